//! Production collaborators for the brief pipeline.

pub mod analysis;
pub mod market_data;
pub mod retrieval;

pub use analysis::{AnalysisCollaborator, AnalysisService, ExposureAnalyzer};
pub use market_data::{MarketDataClient, MarketDataCollaborator, YahooFinanceClient};
pub use retrieval::RetrievalCollaborator;
