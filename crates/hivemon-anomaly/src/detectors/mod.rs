pub mod composite;
pub mod mad;
pub mod seasonal;
pub mod smoothing;
pub mod statistical;

pub use composite::CompositeDetector;
pub use mad::MadDetector;
pub use seasonal::{SeasonalDetector, SeasonalPeriod};
pub use smoothing::ExponentialSmoothingDetector;
pub use statistical::StatisticalDetector;
