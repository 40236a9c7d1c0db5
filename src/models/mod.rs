pub mod analysis;
pub mod food_log;
pub mod metrics;
pub mod sync;
pub mod vitals;

pub use analysis::{AnalysisResult, BadgeColor, FoodAnalysis, StatusBadge};
pub use food_log::{FoodLogEntry, NewFoodLog};
pub use metrics::{MetricField, MetricsSnapshot, Reading};
pub use sync::SyncStatus;
pub use vitals::{NewVitalsRecord, VitalsRecord};
