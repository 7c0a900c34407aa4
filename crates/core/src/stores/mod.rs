pub mod bedrock;
pub mod dynamodb;
pub mod memory;
pub mod s3;

pub use bedrock::{BedrockEmbeddings, BedrockRuntime, BedrockTextModel};
pub use dynamodb::DynamoDbTable;
pub use memory::{MemoryDocumentTable, MemoryObjectStore};
pub use s3::S3ObjectStore;
