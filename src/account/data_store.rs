use crate::storage::{EntityKind, Storable, StorageResult};

/// Opaque data blob belonging to an account. Content is never inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStore {
    pub email: String,
    pub content: Vec<u8>,
}

impl DataStore {
    pub fn new(email: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            email: email.into(),
            content,
        }
    }
}

impl Storable for DataStore {
    const KIND: EntityKind = EntityKind::DataStore;

    fn key(&self) -> Vec<u8> {
        self.email.as_bytes().to_vec()
    }

    fn serialize(&self) -> StorageResult<Vec<u8>> {
        Ok(self.content.clone())
    }

    fn deserialize(key: &[u8], data: &[u8]) -> StorageResult<Self> {
        Ok(Self {
            email: String::from_utf8_lossy(key).into_owned(),
            content: data.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_is_stored_verbatim() {
        let content = vec![0u8, 159, 146, 150, b'{', b'}', 255];
        let store = DataStore::new("u@example.com", content.clone());

        let bytes = store.serialize().unwrap();
        assert_eq!(bytes, content);

        let restored = DataStore::deserialize(&store.key(), &bytes).unwrap();
        assert_eq!(restored, store);
    }
}
