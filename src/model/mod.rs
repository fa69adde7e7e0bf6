pub mod fixture;
pub mod profile;

// Re-export commonly used types at the model level.
pub use fixture::{
    parse_patch, split_absolute, DmxAddress, FixtureId, FixtureRecord, GroupRole, MatchKind,
    Universe, UNIVERSE_SIZE,
};
pub use profile::{
    strip_gdtf_extension, AttributeDef, DmxMode, Profile, ProfileCatalog, ProfileDraft, ProfileId,
    ProfileSource,
};
