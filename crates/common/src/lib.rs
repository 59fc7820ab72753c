// fresco-common: shared protocol types for the Fresco collaboration client.

pub mod protocol;
pub mod types;
