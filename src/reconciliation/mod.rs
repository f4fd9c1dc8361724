pub mod engine;
pub mod events;

pub use engine::{Effect, ReconcileOutcome, Reconciler, SweepReport};
pub use events::{ChargeData, PaymentMetadata, ProviderEvent, TransferData};
