pub mod analysis_llm;
pub mod db;
pub mod image_store;
pub mod nutrition;
pub mod verdict;

pub use analysis_llm::OpenAiAnalysisAdapter;
pub use db::DbAdapter;
pub use image_store::S3ImageStore;
pub use nutrition::OpenFoodFactsAdapter;
