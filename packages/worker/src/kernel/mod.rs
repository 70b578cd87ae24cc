// Kernel - core infrastructure with dependency injection
//
// Holds the capability traits the worker consumes (AI generation, email,
// push) and their production implementations. Business logic belongs in
// domain layers and the worker pipeline, not here.

pub mod ai;
pub mod deps;
pub mod email;
pub mod expo;
pub mod test_dependencies;
pub mod traits;

pub use ai::RigAiClient;
pub use deps::WorkerDeps;
pub use email::SmtpEmailService;
pub use expo::ExpoClient;
pub use traits::*;
