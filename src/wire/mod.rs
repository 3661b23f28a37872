pub mod advertisement;
pub mod data_frame;

use thiserror::Error;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
}
