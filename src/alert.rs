//! Network alerts
//!
//! An alert is broadcast to notify peers about a network problem.  The
//! payload is signed by the issuer; signature verification is the
//! application's responsibility, so the raw payload and signature are
//! retained alongside the decoded fields.
//!
//! ```text
//!   Size       Field           Description
//!   ====       =====           ===========
//!   4 bytes    Version         Alert version
//!   8 bytes    RelayUntil      Relay the alert until this time (seconds)
//!   8 bytes    Expires         Alert expires at this time (seconds)
//!   4 bytes    AlertID         Unique identifier for this alert
//!   4 bytes    CancelID        Cancel the alert with this identifier
//!    IntSet    CancelSet       Set of alert identifiers to cancel
//!   4 bytes    MinVersion      Minimum applicable protocol version
//!   4 bytes    MaxVersion      Maximum applicable protocol version
//!    StrSet    SubVersionSet   Applicable user-agent strings
//!   4 bytes    Priority        Relative priority
//!   String     Comment         Comment about the alert
//!   String     Status          Alert message to display and log
//!   String     Reserved        Reserved for future use
//! ```

use crate::buffer::SerializedBuffer;
use crate::error::{CoreError, Result};

/// Upper bound on the cancel and sub-version set sizes
const MAX_SET_SIZE: u64 = 1000;

/// A decoded network alert
#[derive(Debug, Clone)]
pub struct Alert {
    payload: Vec<u8>,
    signature: Vec<u8>,
    version: u32,
    relay_until: u64,
    expires: u64,
    alert_id: u32,
    cancel_id: u32,
    cancel_set: Vec<u32>,
    min_version: u32,
    max_version: u32,
    sub_versions: Vec<String>,
    priority: u32,
    comment: String,
    status: String,
    canceled: bool,
}

impl Alert {
    /// Decodes an alert from its signed payload
    pub fn new(payload: Vec<u8>, signature: Vec<u8>) -> Result<Alert> {
        let mut buffer = SerializedBuffer::from_bytes(payload);
        let version = buffer.get_u32()?;
        let relay_until = buffer.get_u64()?;
        let expires = buffer.get_u64()?;
        let alert_id = buffer.get_u32()?;
        let cancel_id = buffer.get_u32()?;
        let cancel_count = buffer.get_var_int()?;
        if cancel_count > MAX_SET_SIZE {
            return Err(CoreError::malformed("alert cancel set is too large"));
        }
        let mut cancel_set = Vec::with_capacity(cancel_count as usize);
        for _ in 0..cancel_count {
            cancel_set.push(buffer.get_u32()?);
        }
        let min_version = buffer.get_u32()?;
        let max_version = buffer.get_u32()?;
        let sub_count = buffer.get_var_int()?;
        if sub_count > MAX_SET_SIZE {
            return Err(CoreError::malformed("alert sub-version set is too large"));
        }
        let mut sub_versions = Vec::with_capacity(sub_count as usize);
        for _ in 0..sub_count {
            sub_versions.push(buffer.get_var_string(256)?);
        }
        let priority = buffer.get_u32()?;
        let comment = buffer.get_var_string(65_536)?;
        let status = buffer.get_var_string(256)?;
        // Reserved field, present but unused
        let _reserved = buffer.get_var_string(256)?;
        let payload = buffer.into_bytes();
        Ok(Alert {
            payload,
            signature,
            version,
            relay_until,
            expires,
            alert_id,
            cancel_id,
            cancel_set,
            min_version,
            max_version,
            sub_versions,
            priority,
            comment,
            status,
            canceled: false,
        })
    }

    /// The raw signed payload, for signature verification
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The issuer signature over the payload
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn relay_until(&self) -> u64 {
        self.relay_until
    }

    pub fn expires(&self) -> u64 {
        self.expires
    }

    pub fn alert_id(&self) -> u32 {
        self.alert_id
    }

    pub fn cancel_id(&self) -> u32 {
        self.cancel_id
    }

    pub fn cancel_set(&self) -> &[u32] {
        &self.cancel_set
    }

    pub fn min_version(&self) -> u32 {
        self.min_version
    }

    pub fn max_version(&self) -> u32 {
        self.max_version
    }

    pub fn sub_versions(&self) -> &[String] {
        &self.sub_versions
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// The alert message to display and log
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    pub fn set_canceled(&mut self, canceled: bool) {
        self.canceled = canceled;
    }
}

/// Serializes an alert payload from its fields (used when constructing
/// alerts to relay in tests and tools)
#[allow(clippy::too_many_arguments)]
pub fn build_payload(
    version: u32,
    relay_until: u64,
    expires: u64,
    alert_id: u32,
    cancel_id: u32,
    cancel_set: &[u32],
    min_version: u32,
    max_version: u32,
    sub_versions: &[&str],
    priority: u32,
    comment: &str,
    status: &str,
) -> Vec<u8> {
    let mut buffer = SerializedBuffer::with_capacity(128);
    buffer.put_u32(version);
    buffer.put_u64(relay_until);
    buffer.put_u64(expires);
    buffer.put_u32(alert_id);
    buffer.put_u32(cancel_id);
    buffer.put_var_int(cancel_set.len() as u64);
    for id in cancel_set {
        buffer.put_u32(*id);
    }
    buffer.put_u32(min_version);
    buffer.put_u32(max_version);
    buffer.put_var_int(sub_versions.len() as u64);
    for sub in sub_versions {
        buffer.put_var_string(sub);
    }
    buffer.put_u32(priority);
    buffer.put_var_string(comment);
    buffer.put_var_string(status);
    buffer.put_var_string("");
    buffer.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_round_trip() {
        let payload = build_payload(
            1,
            1_400_000_000,
            1_500_000_000,
            1021,
            1020,
            &[1010, 1011],
            60001,
            70002,
            &["/Satoshi:0.8.6/"],
            5,
            "internal note",
            "URGENT: upgrade required",
        );
        let alert = Alert::new(payload.clone(), vec![0x30, 0x45]).unwrap();
        assert_eq!(alert.version(), 1);
        assert_eq!(alert.relay_until(), 1_400_000_000);
        assert_eq!(alert.expires(), 1_500_000_000);
        assert_eq!(alert.alert_id(), 1021);
        assert_eq!(alert.cancel_id(), 1020);
        assert_eq!(alert.cancel_set(), &[1010, 1011]);
        assert_eq!(alert.min_version(), 60001);
        assert_eq!(alert.max_version(), 70002);
        assert_eq!(alert.sub_versions(), &["/Satoshi:0.8.6/".to_string()]);
        assert_eq!(alert.priority(), 5);
        assert_eq!(alert.comment(), "internal note");
        assert_eq!(alert.status(), "URGENT: upgrade required");
        assert_eq!(alert.payload(), &payload[..]);
        assert_eq!(alert.signature(), &[0x30, 0x45]);
        assert!(!alert.is_canceled());
    }

    #[test]
    fn test_alert_empty_sets() {
        let payload = build_payload(1, 0, 0, 1, 0, &[], 0, 0, &[], 0, "", "status");
        let alert = Alert::new(payload, Vec::new()).unwrap();
        assert!(alert.cancel_set().is_empty());
        assert!(alert.sub_versions().is_empty());
        assert_eq!(alert.comment(), "");
    }

    #[test]
    fn test_alert_truncated_payload() {
        let payload = build_payload(1, 0, 0, 1, 0, &[], 0, 0, &[], 0, "", "status");
        let truncated = payload[..20].to_vec();
        assert!(Alert::new(truncated, Vec::new()).is_err());
    }

    #[test]
    fn test_alert_cancel_flag() {
        let payload = build_payload(1, 0, 0, 2, 1, &[], 0, 0, &[], 0, "", "s");
        let mut alert = Alert::new(payload, Vec::new()).unwrap();
        alert.set_canceled(true);
        assert!(alert.is_canceled());
    }
}
