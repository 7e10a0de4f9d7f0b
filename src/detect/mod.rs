mod backend;
pub mod backends;
mod ensemble;
mod label_map;

pub use backend::{ActionPredictor, HumanDetector};
pub use backends::{
    build_detector, build_predictor, DetectorSettings, FixedPredictor, MemberSettings, StubDetector,
};
pub use ensemble::Ensemble;
pub use label_map::LabelMap;
