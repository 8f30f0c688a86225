//! Authentication of requests coming back from the chat server.

use std::fmt;

use ci_relay_core::models::ApprovalContext;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Key of the signature inside an action context.
pub const SIGNATURE_KEY: &str = "signature";

/// Signs the approval context attached to an approve button, so that a click can only
/// target a workflow the bot itself posted about.
#[derive(Clone)]
pub struct ContextSigner {
    key: Vec<u8>,
}

impl fmt::Debug for ContextSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSigner").finish_non_exhaustive()
    }
}

impl ContextSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self { Self { key: secret.as_ref().to_vec() } }

    fn mac(&self, context: &ApprovalContext) -> Hmac<Sha256> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(context.workflow_id.as_bytes());
        mac.update(b"\n");
        mac.update(context.project.slug().as_bytes());
        mac
    }

    /// Hex-encoded HMAC-SHA256 of `context`.
    pub fn sign(&self, context: &ApprovalContext) -> String {
        hex::encode(self.mac(context).finalize().into_bytes())
    }

    pub fn verify(&self, context: &ApprovalContext, signature: &str) -> bool {
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        self.mac(context).verify_slice(&signature).is_ok()
    }
}

/// Compare the slash command token against the configured one. Digests are compared so
/// the timing does not depend on how much of the token matches.
pub fn command_token_matches(expected: &str, provided: &str) -> bool {
    !expected.is_empty() && Sha256::digest(expected) == Sha256::digest(provided)
}
