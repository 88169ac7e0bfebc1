//! Identity header stamping and validation
//!
//! Every headed request carries a four-field [`MessageHeader`] naming the
//! sender, the receiver, the federation, and the optional shared certificate
//! common name. Every headed response is checked against the same identities
//! before its payload is handed to the caller; any mismatch is a fatal
//! configuration or logic defect, never a transient condition.

use crate::error::Error;
use crate::proto::MessageHeader;
use crate::Result;

/// The identities of a federation session, fixed at client construction.
#[derive(Clone, Debug, Default)]
pub struct Identity {
    /// Unique id of the aggregator this client talks to
    pub aggregator_uuid: String,
    /// Unique id of the federation session
    pub federation_uuid: String,
    /// Shared certificate common name constraint, if the federation uses one
    pub single_col_cert_common_name: Option<String>,
}

impl Identity {
    /// Build the header stamped on an outgoing request from `sender`.
    ///
    /// The receiver is always the aggregator; an unset common name is sent
    /// as the empty string.
    pub fn stamp(&self, sender: &str) -> MessageHeader {
        MessageHeader {
            sender: sender.to_string(),
            receiver: self.aggregator_uuid.clone(),
            federation_uuid: self.federation_uuid.clone(),
            single_col_cert_common_name: self
                .single_col_cert_common_name
                .clone()
                .unwrap_or_default(),
        }
    }

    /// Validate a response header against the expected identities.
    ///
    /// Checks receiver, sender, federation uuid, and common name in that
    /// order, failing fast on the first violation. A missing header fails on
    /// the `header` pseudo-field.
    pub fn validate(&self, header: Option<&MessageHeader>, expected_receiver: &str) -> Result<()> {
        let header = header.ok_or_else(|| Error::HeaderMismatch {
            field: "header",
            expected: "present".to_string(),
            actual: "missing".to_string(),
        })?;

        // Check that the message was intended to go to this collaborator
        check_field("receiver", expected_receiver, &header.receiver)?;
        check_field("sender", &self.aggregator_uuid, &header.sender)?;
        check_field(
            "federation_uuid",
            &self.federation_uuid,
            &header.federation_uuid,
        )?;
        check_field(
            "single_col_cert_common_name",
            self.single_col_cert_common_name.as_deref().unwrap_or(""),
            &header.single_col_cert_common_name,
        )?;

        Ok(())
    }
}

fn check_field(field: &'static str, expected: &str, actual: &str) -> Result<()> {
    if expected != actual {
        return Err(Error::HeaderMismatch {
            field,
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}
