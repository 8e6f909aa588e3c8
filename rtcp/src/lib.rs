#![warn(rust_2018_idioms)]

pub mod error;
pub mod header;
pub mod packet;
pub mod picture_loss_indication;
pub mod receiver_report;
pub mod sender_report;
pub mod source_description;
pub mod transport_layer_cc;
pub mod transport_layer_nack;

pub use error::Error;
