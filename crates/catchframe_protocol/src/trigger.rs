//! Trigger message payload.
//!
//! The payload is exactly the report id as raw bytes. It is a hint to
//! re-evaluate a report, not state: the handler always reads the record.

use catchframe_ids::ReportId;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPayload {
    pub report_id: ReportId,
}

impl TriggerPayload {
    pub fn new(report_id: ReportId) -> Self {
        Self { report_id }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.report_id.as_bytes().to_vec()
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.is_empty() {
            return Err(ProtocolError::InvalidTrigger("empty payload".to_string()));
        }
        let report_id =
            ReportId::from_bytes(raw).map_err(|e| ProtocolError::InvalidTrigger(e.to_string()))?;
        Ok(Self { report_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_raw_id_bytes() {
        let id = ReportId::new();
        let payload = TriggerPayload::new(id.clone()).encode();
        assert_eq!(payload, id.as_str().as_bytes());
        assert_eq!(TriggerPayload::decode(&payload).unwrap().report_id, id);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(TriggerPayload::decode(b"").is_err());
        assert!(TriggerPayload::decode(b"{\"id\":1}").is_err());
    }
}
