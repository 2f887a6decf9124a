//! UnityFS AssetBundle container reader.
//!
//! Parses the bundle header, reassembles the storage blocks (plain, LZ4,
//! LZ4HC, or the game's LZ4AK recompression), and walks the contained
//! serialized files for the three object classes the pipeline consumes:
//! `AudioClip`, `Texture2D` and `Sprite`. Object payloads are decoded against
//! the fixed field layout of the Unity 2017.4 line the game ships; the
//! bundles carry no type trees we could consult instead.
//!
//! Any malformed structure fails the containing bundle only — callers walking
//! a directory of bundles log the failure and continue.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::path::Path;
use tracing::warn;

use super::lz4ak;
use crate::error::{Result, SynthError};

/// Serialized class ids for the objects the extractor consumes.
pub mod class_ids {
    pub const TEXTURE_2D: i32 = 28;
    pub const AUDIO_CLIP: i32 = 83;
    pub const SPRITE: i32 = 213;
}

/// Block/blocks-info compression scheme, from the low six flag bits.
const COMPRESSION_MASK: u32 = 0x3F;
const COMPRESSION_NONE: u32 = 0;
const COMPRESSION_LZMA: u32 = 1;
const COMPRESSION_LZ4: u32 = 2;
const COMPRESSION_LZ4HC: u32 = 3;
/// The slot the game reuses for its LZ4AK recompression.
const COMPRESSION_LZ4AK: u32 = 4;

/// Blocks-info placement flag: directory sits at the end of the file.
const FLAG_BLOCKS_INFO_AT_END: u32 = 0x80;

/// Bundle file header.
#[derive(Debug, Clone)]
pub struct BundleHeader {
    pub signature: String,
    pub version: u32,
    pub unity_version: String,
    pub unity_revision: String,
    pub size: u64,
    pub compressed_blocks_info_size: u32,
    pub uncompressed_blocks_info_size: u32,
    pub flags: u32,
}

/// One storage block in the bundle payload.
#[derive(Debug, Clone, Copy)]
struct StorageBlock {
    uncompressed_size: u32,
    compressed_size: u32,
    flags: u16,
}

/// One file entry in the bundle directory.
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    pub path: String,
    pub offset: u64,
    pub size: u64,
}

/// An audio clip extracted from a bundle.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub name: String,
    /// Raw sample bytes in the container's encoding (FSB-wrapped).
    pub data: Vec<u8>,
}

/// A decoded texture with its object path id (sprites reference it by id).
#[derive(Debug, Clone)]
pub struct TextureImage {
    pub name: String,
    pub path_id: i64,
    pub image: image::RgbaImage,
}

/// A sprite frame: a named rectangle into a texture.
#[derive(Debug, Clone)]
pub struct SpriteFrame {
    pub name: String,
    pub texture_path_id: i64,
    /// (x, y, width, height) in texture pixels, bottom-left origin.
    pub rect: (f32, f32, f32, f32),
}

/// Objects yielded by [`Bundle::objects`].
#[derive(Debug, Clone)]
pub enum BundleObject {
    Audio(AudioClip),
    Texture(TextureImage),
    Sprite(SpriteFrame),
}

/// A parsed bundle: header, directory, and the reassembled payload.
pub struct Bundle {
    pub header: BundleHeader,
    nodes: Vec<DirectoryNode>,
    data: Vec<u8>,
}

impl Bundle {
    /// Read and parse a bundle file.
    pub fn open(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        Self::from_bytes(raw)
    }

    /// Parse a bundle from memory.
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        let mut r = Reader::big(&raw);

        let signature = r.cstring()?;
        if signature != "UnityFS" {
            return Err(SynthError::Codec(format!(
                "unsupported bundle signature {signature:?}"
            )));
        }
        let version = r.u32()?;
        let unity_version = r.cstring()?;
        let unity_revision = r.cstring()?;
        let size = r.u64()?;
        let compressed_blocks_info_size = r.u32()?;
        let uncompressed_blocks_info_size = r.u32()?;
        let flags = r.u32()?;
        if version >= 7 {
            r.align(16);
        }

        let header = BundleHeader {
            signature,
            version,
            unity_version,
            unity_revision,
            size,
            compressed_blocks_info_size,
            uncompressed_blocks_info_size,
            flags,
        };

        let info_compressed = if flags & FLAG_BLOCKS_INFO_AT_END != 0 {
            let start = raw
                .len()
                .checked_sub(compressed_blocks_info_size as usize)
                .ok_or_else(|| SynthError::Codec("blocks info larger than bundle".into()))?;
            raw[start..].to_vec()
        } else {
            r.take(compressed_blocks_info_size as usize)?.to_vec()
        };
        let info = decompress_block(
            flags & COMPRESSION_MASK,
            info_compressed,
            uncompressed_blocks_info_size as usize,
        )?;

        let mut ir = Reader::big(&info);
        ir.skip(16)?; // uncompressed data hash

        let block_count = ir.u32()? as usize;
        let mut blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            blocks.push(StorageBlock {
                uncompressed_size: ir.u32()?,
                compressed_size: ir.u32()?,
                flags: ir.u16()?,
            });
        }

        let node_count = ir.u32()? as usize;
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let offset = ir.u64()?;
            let size = ir.u64()?;
            let _node_flags = ir.u32()?;
            let path = ir.cstring()?;
            nodes.push(DirectoryNode { path, offset, size });
        }

        // Reassemble the payload from the storage blocks.
        let mut data = Vec::with_capacity(blocks.iter().map(|b| b.uncompressed_size as usize).sum());
        for block in &blocks {
            let chunk = r.take(block.compressed_size as usize)?.to_vec();
            let unpacked = decompress_block(
                u32::from(block.flags) & COMPRESSION_MASK,
                chunk,
                block.uncompressed_size as usize,
            )?;
            data.extend_from_slice(&unpacked);
        }

        Ok(Self {
            header,
            nodes,
            data,
        })
    }

    /// Directory entries of the bundle.
    pub fn nodes(&self) -> &[DirectoryNode] {
        &self.nodes
    }

    /// Payload bytes of one directory entry.
    pub fn node_data(&self, node: &DirectoryNode) -> Result<&[u8]> {
        let start = node.offset as usize;
        let end = start
            .checked_add(node.size as usize)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| SynthError::Codec(format!("node {:?} out of bounds", node.path)))?;
        Ok(&self.data[start..end])
    }

    /// Iterate the audio, texture and sprite objects of every serialized file
    /// in the bundle. Objects that fail to decode are skipped with a warning;
    /// a structurally broken serialized file fails the bundle.
    pub fn objects(&self) -> Result<Vec<BundleObject>> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if is_resource_node(&node.path) {
                continue;
            }
            let data = self.node_data(node)?;
            let file = SerializedFile::parse(data)?;
            for info in &file.objects {
                let result = match info.class_id {
                    class_ids::AUDIO_CLIP => self.read_audio(&file, info).map(BundleObject::Audio),
                    class_ids::TEXTURE_2D => {
                        self.read_texture(&file, info).map(BundleObject::Texture)
                    }
                    class_ids::SPRITE => read_sprite(&file, info).map(BundleObject::Sprite),
                    _ => continue,
                };
                match result {
                    Ok(obj) => out.push(obj),
                    Err(e) => warn!(
                        "skipping object {} (class {}) in {}: {e}",
                        info.path_id, info.class_id, node.path
                    ),
                }
            }
        }
        Ok(out)
    }

    /// Resolve a streamed resource reference against the bundle directory.
    fn resource_bytes(&self, source: &str, offset: u64, size: u64) -> Result<Vec<u8>> {
        let filename = source.rsplit('/').next().unwrap_or(source);
        let node = self
            .nodes
            .iter()
            .find(|n| n.path.rsplit('/').next() == Some(filename))
            .ok_or_else(|| {
                SynthError::Codec(format!("streamed resource {source:?} not in bundle"))
            })?;
        let data = self.node_data(node)?;
        let start = offset as usize;
        let end = start
            .checked_add(size as usize)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| SynthError::Codec(format!("resource range in {source:?} out of bounds")))?;
        Ok(data[start..end].to_vec())
    }

    fn read_audio(&self, file: &SerializedFile, info: &ObjectInfo) -> Result<AudioClip> {
        let mut r = file.object_reader(info)?;
        let name = r.aligned_string()?;
        r.skip(4 * 4)?; // load type, channels, frequency, bits per sample
        r.skip(4)?; // length
        r.skip_bool_block(2)?; // tracker format, ambisonic
        r.align(4);
        r.skip(4)?; // subsound index
        r.skip_bool_block(3)?; // preload, load in background, legacy 3D
        r.align(4);
        let source = r.aligned_string()?;
        let offset = r.u64()?;
        let size = r.u64()?;

        let data = if source.is_empty() {
            // Inline payload (rare, small clips): size-prefixed byte array.
            let len = r.u32()? as usize;
            r.take(len)?.to_vec()
        } else {
            self.resource_bytes(&source, offset, size)?
        };
        Ok(AudioClip { name, data })
    }

    fn read_texture(&self, file: &SerializedFile, info: &ObjectInfo) -> Result<TextureImage> {
        let mut r = file.object_reader(info)?;
        let name = r.aligned_string()?;
        let width = r.i32()?;
        let height = r.i32()?;
        r.skip(4)?; // complete image size
        let format = r.i32()?;
        r.skip(4)?; // mip count
        r.skip_bool_block(2)?; // readable, read allowed
        r.align(4);
        r.skip(4 * 2)?; // image count, texture dimension
        r.skip(4 * 6)?; // GLTextureSettings: filter, aniso, mip bias, wrap u/v/w
        r.skip(4 * 2)?; // lightmap format, color space
        let data_len = r.u32()? as usize;
        let pixels = if data_len > 0 {
            r.take(data_len)?.to_vec()
        } else {
            r.align(4);
            let stream_offset = r.u64()?;
            let stream_size = r.u32()? as u64;
            let stream_path = r.aligned_string()?;
            self.resource_bytes(&stream_path, stream_offset, stream_size)?
        };

        let image = decode_texture(width, height, format, &pixels)?;
        Ok(TextureImage {
            name,
            path_id: info.path_id,
            image,
        })
    }
}

fn is_resource_node(path: &str) -> bool {
    path.ends_with(".resS") || path.ends_with(".resource")
}

fn read_sprite(file: &SerializedFile, info: &ObjectInfo) -> Result<SpriteFrame> {
    let mut r = file.object_reader(info)?;
    let name = r.aligned_string()?;
    let x = r.f32()?;
    let y = r.f32()?;
    let w = r.f32()?;
    let h = r.f32()?;
    r.skip(4 * 2)?; // offset
    r.skip(4 * 4)?; // border
    r.skip(4)?; // pixels to units
    r.skip(4 * 2)?; // pivot
    r.skip(4)?; // extrude
    r.skip_bool_block(1)?; // is polygon
    r.align(4);
    r.skip(16 + 8)?; // render data key (GUID + file id)
    let tag_count = r.u32()? as usize;
    for _ in 0..tag_count {
        r.aligned_string()?;
    }
    r.skip(4 + 8)?; // sprite atlas PPtr
    // SpriteRenderData starts with the texture PPtr.
    r.skip(4)?; // texture file id
    let texture_path_id = r.i64()?;

    Ok(SpriteFrame {
        name,
        texture_path_id,
        rect: (x, y, w, h),
    })
}

/// Decompress one storage block according to its compression flag.
fn decompress_block(scheme: u32, data: Vec<u8>, uncompressed_size: usize) -> Result<Vec<u8>> {
    match scheme {
        COMPRESSION_NONE => Ok(data),
        COMPRESSION_LZ4 | COMPRESSION_LZ4HC => {
            lz4_flex::block::decompress(&data, uncompressed_size)
                .map_err(|e| SynthError::Codec(format!("malformed stream: {e}")))
        }
        COMPRESSION_LZ4AK => lz4ak::decompress(data, uncompressed_size),
        COMPRESSION_LZMA => Err(SynthError::Codec(
            "LZMA-compressed bundles are not supported".into(),
        )),
        other => Err(SynthError::Codec(format!(
            "unknown block compression scheme {other}"
        ))),
    }
}

/// Texture format codes the extractor can decode. Portraits and their alpha
/// masks ship uncompressed in the `avg` bundles.
const TF_ALPHA8: i32 = 1;
const TF_RGB24: i32 = 3;
const TF_RGBA32: i32 = 4;
const TF_ARGB32: i32 = 5;
const TF_BGRA32: i32 = 37;

fn decode_texture(width: i32, height: i32, format: i32, data: &[u8]) -> Result<image::RgbaImage> {
    let (w, h) = (width.max(0) as u32, height.max(0) as u32);
    let pixel_count = (w as usize) * (h as usize);
    let check_len = |bpp: usize| -> Result<()> {
        if data.len() < pixel_count * bpp {
            return Err(SynthError::Codec(format!(
                "texture data truncated: {} bytes for {w}x{h} at {bpp} Bpp",
                data.len()
            )));
        }
        Ok(())
    };

    let mut img = image::RgbaImage::new(w, h);
    match format {
        TF_ALPHA8 => {
            check_len(1)?;
            for (i, px) in img.pixels_mut().enumerate() {
                *px = image::Rgba([255, 255, 255, data[i]]);
            }
        }
        TF_RGB24 => {
            check_len(3)?;
            for (i, px) in img.pixels_mut().enumerate() {
                let o = i * 3;
                *px = image::Rgba([data[o], data[o + 1], data[o + 2], 255]);
            }
        }
        TF_RGBA32 => {
            check_len(4)?;
            for (i, px) in img.pixels_mut().enumerate() {
                let o = i * 4;
                *px = image::Rgba([data[o], data[o + 1], data[o + 2], data[o + 3]]);
            }
        }
        TF_ARGB32 => {
            check_len(4)?;
            for (i, px) in img.pixels_mut().enumerate() {
                let o = i * 4;
                *px = image::Rgba([data[o + 1], data[o + 2], data[o + 3], data[o]]);
            }
        }
        TF_BGRA32 => {
            check_len(4)?;
            for (i, px) in img.pixels_mut().enumerate() {
                let o = i * 4;
                *px = image::Rgba([data[o + 2], data[o + 1], data[o], data[o + 3]]);
            }
        }
        other => {
            return Err(SynthError::Codec(format!(
                "unsupported texture format {other}"
            )));
        }
    }

    // Unity stores texture rows bottom-up.
    image::imageops::flip_vertical_in_place(&mut img);
    Ok(img)
}

/// One entry in a serialized file's object table.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub path_id: i64,
    pub byte_start: u64,
    pub byte_size: u32,
    pub class_id: i32,
}

/// Minimal serialized-file reader: header and object table only.
struct SerializedFile<'a> {
    data: &'a [u8],
    data_offset: u64,
    little_endian: bool,
    objects: Vec<ObjectInfo>,
}

impl<'a> SerializedFile<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        let mut r = Reader::big(data);
        let _metadata_size = r.u32()?;
        let _file_size = r.u32()?;
        let version = r.u32()?;
        let data_offset = u64::from(r.u32()?);
        if !(15..=22).contains(&version) {
            return Err(SynthError::Codec(format!(
                "unsupported serialized file version {version}"
            )));
        }
        let endianness = r.u8()?;
        r.skip(3)?; // reserved
        let little_endian = endianness == 0;
        if little_endian {
            r.set_little();
        }

        let _unity_version = r.cstring()?;
        let _target_platform = r.u32()?;
        let enable_type_tree = r.u8()? != 0;

        let type_count = r.u32()? as usize;
        let mut type_class_ids = Vec::with_capacity(type_count);
        for _ in 0..type_count {
            let class_id = r.i32()?;
            let _is_stripped = r.u8()?;
            let _script_type_index = r.i16()?;
            if class_id == 114 {
                r.skip(16)?; // script id hash
            }
            r.skip(16)?; // old type hash
            if enable_type_tree {
                skip_type_tree_blob(&mut r, version)?;
            }
            type_class_ids.push(class_id);
        }

        let object_count = r.u32()? as usize;
        let mut objects = Vec::with_capacity(object_count);
        for _ in 0..object_count {
            r.align(4);
            let path_id = r.i64()?;
            let byte_start = if version >= 22 {
                r.u64()?
            } else {
                u64::from(r.u32()?)
            };
            let byte_size = r.u32()?;
            let type_index = r.u32()? as usize;
            let class_id = *type_class_ids.get(type_index).ok_or_else(|| {
                SynthError::Codec(format!("object references unknown type {type_index}"))
            })?;
            objects.push(ObjectInfo {
                path_id,
                byte_start,
                byte_size,
                class_id,
            });
        }

        Ok(Self {
            data,
            data_offset,
            little_endian,
            objects,
        })
    }

    /// Reader positioned at an object's payload.
    fn object_reader(&self, info: &ObjectInfo) -> Result<Reader<'a>> {
        let start = (self.data_offset + info.byte_start) as usize;
        let end = start
            .checked_add(info.byte_size as usize)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                SynthError::Codec(format!("object {} payload out of bounds", info.path_id))
            })?;
        let slice = &self.data[start..end];
        Ok(if self.little_endian {
            Reader::little(slice)
        } else {
            Reader::big(slice)
        })
    }
}

/// Skip the blob-format type tree attached to a serialized type.
fn skip_type_tree_blob(r: &mut Reader<'_>, version: u32) -> Result<()> {
    let node_count = r.u32()? as usize;
    let string_buffer_size = r.u32()? as usize;
    let node_size = if version >= 19 { 32 } else { 24 };
    r.skip(node_count * node_size)?;
    r.skip(string_buffer_size)?;
    Ok(())
}

/// Byte-slice reader with switchable endianness.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    little: bool,
}

impl<'a> Reader<'a> {
    fn big(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            little: false,
        }
    }

    fn little(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            little: true,
        }
    }

    fn set_little(&mut self) {
        self.little = true;
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| SynthError::Codec("unexpected end of data".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    /// Skip `count` single-byte booleans.
    fn skip_bool_block(&mut self, count: usize) -> Result<()> {
        self.skip(count)
    }

    fn align(&mut self, to: usize) {
        let rem = self.pos % to;
        if rem != 0 {
            self.pos = (self.pos + to - rem).min(self.data.len());
        }
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(if self.little {
            LittleEndian::read_u16(b)
        } else {
            BigEndian::read_u16(b)
        })
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(if self.little {
            LittleEndian::read_u32(b)
        } else {
            BigEndian::read_u32(b)
        })
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(if self.little {
            LittleEndian::read_u64(b)
        } else {
            BigEndian::read_u64(b)
        })
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(self.u64()? as i64)
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32()?))
    }

    /// Zero-terminated string.
    fn cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| SynthError::Codec("unterminated string".into()))?;
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }

    /// Length-prefixed string with 4-byte alignment after the payload.
    fn aligned_string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        let s = String::from_utf8_lossy(bytes).into_owned();
        self.align(4);
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    /// Assemble a minimal uncompressed UnityFS bundle with one node.
    fn build_bundle(node_path: &str, payload: &[u8]) -> Vec<u8> {
        let mut info = Vec::new();
        info.extend_from_slice(&[0u8; 16]); // data hash
        info.extend_from_slice(&1u32.to_be_bytes()); // block count
        info.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        info.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        info.extend_from_slice(&0u16.to_be_bytes()); // block flags: stored
        info.extend_from_slice(&1u32.to_be_bytes()); // node count
        info.extend_from_slice(&0u64.to_be_bytes()); // offset
        info.extend_from_slice(&(payload.len() as u64).to_be_bytes()); // size
        info.extend_from_slice(&0u32.to_be_bytes()); // node flags
        info.extend_from_slice(node_path.as_bytes());
        info.push(0);

        let mut out = Vec::new();
        out.extend_from_slice(b"UnityFS\0");
        out.extend_from_slice(&6u32.to_be_bytes()); // format version
        out.extend_from_slice(b"5.x.x\0");
        out.extend_from_slice(b"2017.4.39f1\0");
        out.extend_from_slice(&0u64.to_be_bytes()); // bundle size (unchecked)
        out.extend_from_slice(&(info.len() as u32).to_be_bytes());
        out.extend_from_slice(&(info.len() as u32).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // flags: stored, info inline
        out.extend_from_slice(&info);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_header_and_directory() {
        let raw = build_bundle("CAB-test", b"hello world");
        let bundle = Bundle::from_bytes(raw).unwrap();
        assert_eq!(bundle.header.signature, "UnityFS");
        assert_eq!(bundle.header.version, 6);
        assert_eq!(bundle.nodes().len(), 1);
        assert_eq!(bundle.nodes()[0].path, "CAB-test");
        assert_eq!(bundle.node_data(&bundle.nodes()[0]).unwrap(), b"hello world");
    }

    #[test]
    fn rejects_foreign_signatures() {
        let raw = b"UnityWeb\0rest".to_vec();
        assert!(Bundle::from_bytes(raw).is_err());
    }

    #[test]
    fn rejects_lzma_blocks() {
        let err = decompress_block(COMPRESSION_LZMA, vec![0u8; 4], 16).unwrap_err();
        assert!(err.to_string().contains("LZMA"));
    }

    #[test]
    fn lz4ak_blocks_round_trip() {
        let payload = b"block payload block payload block payload".to_vec();
        let packed = crate::bundle::lz4ak::compress(&payload);
        let unpacked = decompress_block(COMPRESSION_LZ4AK, packed, payload.len()).unwrap();
        assert_eq!(unpacked, payload);
    }

    #[test]
    fn decodes_rgba32_textures() {
        // 2x1: red then semi-transparent green, bottom row first in storage.
        let data = [255, 0, 0, 255, 0, 255, 0, 128];
        let img = decode_texture(2, 1, TF_RGBA32, &data).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [0, 255, 0, 128]);
    }

    #[test]
    fn decodes_alpha8_as_mask() {
        let data = [0, 128, 255, 64];
        let img = decode_texture(2, 2, TF_ALPHA8, &data).unwrap();
        // Storage is bottom-up; the first stored pixel lands on the last row.
        assert_eq!(img.get_pixel(0, 1).0, [255, 255, 255, 0]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 255, 255, 64]);
    }

    #[test]
    fn unsupported_texture_format_fails_object() {
        let err = decode_texture(2, 2, 34, &[0u8; 64]).unwrap_err();
        assert!(err.to_string().contains("unsupported texture format"));
    }

    #[test]
    fn truncated_texture_data_is_codec_error() {
        let err = decode_texture(4, 4, TF_RGBA32, &[0u8; 8]).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }
}
