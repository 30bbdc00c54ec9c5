use thiserror::Error;

#[derive(Error, Debug)]
pub enum VpnError {
    #[error("vpn provisioner transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("vpn provisioner rejected the request with status {0}")]
    Rejected(u16),
    #[error("vpn provisioner returned an unparseable response: {0}")]
    Decode(String),
    #[error("vpn provisioner retry budget exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}
