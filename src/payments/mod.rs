pub mod amount;
pub mod paystack;
pub mod signature;

pub use amount::{from_minor_units, to_minor_units};
pub use paystack::{
    InitializedPayment, PaymentGateway, PaystackClient, ProviderStatus, VerifiedTransaction,
    VirtualAccountRequest,
};
pub use signature::{verify_webhook_signature, SIGNATURE_HEADER};
