pub mod backend;
pub mod supabase;
pub mod traits;
pub mod types;

pub use backend::HttpBackend;
pub use supabase::{SupabaseAuth, SupabaseRest};
pub use traits::{AuthProvider, ChatBackend, ChatStore};
pub use types::{ChatRequest, GeneratedImage, ProviderError, StreamEvent};
