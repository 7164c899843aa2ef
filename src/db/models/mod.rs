pub mod record;

pub use record::WeightRecord;
