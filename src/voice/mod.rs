//! Voice identity: speaker resolution, the durable voice map, reference-clip
//! selection, and the supporting character tables.

pub mod gender;
pub mod images;
pub mod reference;
pub mod resolver;
pub mod table_map;
pub mod voice_map;

pub use gender::GenderMapper;
pub use images::CharacterImageIndex;
pub use reference::{
    ReferenceClip, ReferenceSelector, MAX_REF_TEXT_LENGTH, MIN_REF_TEXT_LENGTH,
};
pub use resolver::{CharacterRecord, Gender, IdentityResolver, VoiceInfo};
pub use table_map::ScriptIdMap;
pub use voice_map::{MappingEntry, VoiceMap};
