pub(crate) mod aggregation;
pub(crate) mod assessment;
pub(crate) mod errors;
pub(crate) mod heuristics;
pub(crate) mod placement;
pub(crate) mod sandbox;
pub(crate) mod sections;
pub(crate) mod store;
