pub mod input_filter;
pub mod marketplace;
pub mod registry;
pub mod schema_extract;
pub mod security;
pub mod types;

pub use input_filter::filter_tool_input;
pub use marketplace::{InstallOutcome, InstalledRecord, IntegrityEntry, Marketplace, MarketplaceEntry, MarketplaceStats};
pub use registry::ToolRegistry;
pub use types::{ToolError, ToolResult, ToolSchema};
