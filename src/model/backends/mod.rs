pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{
    stub_bundle, StubAppearanceExtractor, StubDecoder, StubPoseExtractor, StubRetargeter,
};

#[cfg(feature = "backend-tract")]
pub use tract::load_bundle as load_tract_bundle;
