//! Toy key system: XOR "decryption" keyed by protection system id.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::elements::{ContextRequest, DecryptError, Decryptor, DecryptorFactory};
use crate::media::DemuxedSample;

/// Decryptor that XORs every payload byte with a fixed key.
#[derive(Debug, Clone)]
pub struct XorDecryptor {
    system_id: String,
    key: u8,
}

impl XorDecryptor {
    pub fn new(system_id: impl Into<String>, key: u8) -> Self {
        Self {
            system_id: system_id.into(),
            key,
        }
    }

    /// Applies the cipher; encryption and decryption are the same operation.
    pub fn apply(key: u8, data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| b ^ key).collect()
    }
}

impl Decryptor for XorDecryptor {
    fn protection_system(&self) -> &str {
        &self.system_id
    }

    fn decrypt(&mut self, mut sample: DemuxedSample) -> Result<DemuxedSample, DecryptError> {
        if self.key == 0 {
            return Err(DecryptError::KeyUnavailable {
                system_id: self.system_id.clone(),
            });
        }
        sample.payload = Self::apply(self.key, &sample.payload).into();
        Ok(sample)
    }
}

/// Factory with a fixed table of protection systems.
#[derive(Debug, Default)]
pub struct StaticDecryptorFactory {
    keys: HashMap<String, u8>,
    requests: Mutex<Vec<ContextRequest>>,
    created: Mutex<Vec<String>>,
}

impl StaticDecryptorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(mut self, system_id: impl Into<String>, key: u8) -> Self {
        self.keys.insert(system_id.into(), key);
        self
    }

    /// Context requests seen during key negotiation.
    pub fn context_requests(&self) -> Vec<ContextRequest> {
        self.requests.lock().clone()
    }

    /// Protection systems a decryptor was requested for, hit or miss.
    pub fn lookups(&self) -> Vec<String> {
        self.created.lock().clone()
    }
}

impl DecryptorFactory for StaticDecryptorFactory {
    fn create_decryptor(&self, system_id: &str) -> Option<Box<dyn Decryptor>> {
        self.created.lock().push(system_id.to_string());
        let key = *self.keys.get(system_id)?;
        Some(Box::new(XorDecryptor::new(system_id, key)))
    }

    fn on_need_context(&self, request: &ContextRequest) {
        self.requests.lock().push(request.clone());
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::media::MediaTime;

    #[test]
    fn test_xor_round_trip() {
        let clear = b"hello".to_vec();
        let sealed = XorDecryptor::apply(0x5a, &clear);
        let mut decryptor = XorDecryptor::new("sys", 0x5a);
        let sample = DemuxedSample::new(
            MediaTime::ZERO,
            MediaTime::ZERO,
            MediaTime::ZERO,
            Bytes::from(sealed),
        );
        assert_eq!(decryptor.decrypt(sample).unwrap().payload, Bytes::from(clear));
    }

    #[test]
    fn test_factory_lookup() {
        let factory = StaticDecryptorFactory::new().with_system("known", 7);
        assert!(factory.create_decryptor("known").is_some());
        assert!(factory.create_decryptor("unknown").is_none());
        assert_eq!(factory.lookups(), vec!["known", "unknown"]);
    }
}
