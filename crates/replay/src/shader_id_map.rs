use std::collections::HashMap;

use common::HandleId;
use tracing::warn;

/// Width of a ray-tracing shader identifier.
pub const SHADER_IDENTIFIER_SIZE: usize = 32;

pub type ShaderIdentifier = [u8; SHADER_IDENTIFIER_SIZE];

/// Translates capture-time shader identifiers to the ones the replay driver
/// assigned to the same shaders.
#[derive(Debug, Default, Clone)]
pub struct ShaderIdMap {
    entries: HashMap<ShaderIdentifier, ShaderIdentifier>,
}

impl ShaderIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `old -> new`, replacing any earlier mapping of `old`.
    ///
    /// The mapping is only recorded when the identifier came from a known state
    /// object properties object; returns whether it was recorded.
    pub fn add(
        &mut self,
        state_object_properties_id: HandleId,
        old_shader_id: &ShaderIdentifier,
        new_shader_id: &ShaderIdentifier,
    ) -> bool {
        if state_object_properties_id.is_null() {
            warn!(
                %state_object_properties_id,
                "Cannot record shader identifier without a state object properties id"
            );
            return false;
        }
        self.entries.insert(*old_shader_id, *new_shader_id);
        true
    }

    /// Rewrites `shader_id` in place. Returns false and leaves it untouched
    /// when no mapping exists.
    pub fn map(&self, shader_id: &mut ShaderIdentifier) -> bool {
        match self.entries.get(shader_id) {
            Some(replay_id) => {
                *shader_id = *replay_id;
                true
            }
            None => {
                warn!("No matching replay shader identifier found for capture shader identifier");
                false
            }
        }
    }

    /// Rewrites the identifier stored at `offset` inside a shader record.
    pub fn map_at(&self, record: &mut [u8], offset: usize) -> bool {
        let record_len = record.len();
        let Some(slot) = offset
            .checked_add(SHADER_IDENTIFIER_SIZE)
            .and_then(|end| record.get_mut(offset..end))
        else {
            warn!(
                offset,
                record_len,
                "Shader record too short to hold a shader identifier"
            );
            return false;
        };

        let mut shader_id = [0u8; SHADER_IDENTIFIER_SIZE];
        shader_id.copy_from_slice(slot);
        if !self.map(&mut shader_id) {
            return false;
        }
        slot.copy_from_slice(&shader_id);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn id(fill: u8) -> ShaderIdentifier {
        [fill; SHADER_IDENTIFIER_SIZE]
    }

    #[traced_test]
    #[test]
    fn null_properties_id_never_records() {
        let mut map = ShaderIdMap::new();
        assert!(!map.add(HandleId::NULL, &id(1), &id(2)));
        assert!(map.is_empty());
        assert!(logs_contain("without a state object properties id"));

        let mut shader = id(1);
        assert!(!map.map(&mut shader));
        assert_eq!(shader, id(1));
        assert!(logs_contain("No matching replay shader identifier"));
    }

    #[test]
    fn map_rewrites_in_place() {
        let mut map = ShaderIdMap::new();
        assert!(map.add(HandleId(5), &id(1), &id(2)));

        let mut shader = id(1);
        assert!(map.map(&mut shader));
        assert_eq!(shader, id(2));
    }

    #[test]
    fn later_add_wins() {
        let mut map = ShaderIdMap::new();
        map.add(HandleId(5), &id(1), &id(2));
        map.add(HandleId(6), &id(1), &id(3));
        assert_eq!(map.len(), 1);

        let mut shader = id(1);
        map.map(&mut shader);
        assert_eq!(shader, id(3));
    }

    #[test]
    fn map_at_touches_only_identifier_bytes() {
        let mut map = ShaderIdMap::new();
        map.add(HandleId(5), &id(0xAA), &id(0xBB));

        let mut record = vec![0x11; 8];
        record.extend_from_slice(&id(0xAA));
        record.extend_from_slice(&[0x22; 16]);

        assert!(map.map_at(&mut record, 8));
        assert!(record[..8].iter().all(|byte| *byte == 0x11));
        assert_eq!(&record[8..40], &id(0xBB));
        assert!(record[40..].iter().all(|byte| *byte == 0x22));
    }

    #[traced_test]
    #[test]
    fn short_record_is_left_alone() {
        let mut map = ShaderIdMap::new();
        map.add(HandleId(5), &id(0xAA), &id(0xBB));

        let mut record = vec![0xAA; 40];
        assert!(!map.map_at(&mut record, 16));
        assert!(!map.map_at(&mut record, usize::MAX));
        assert!(record.iter().all(|byte| *byte == 0xAA));
        assert!(logs_contain("Shader record too short"));
    }
}
