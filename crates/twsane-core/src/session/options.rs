//! Name to index map over a device's option list.

use std::collections::HashMap;

use tracing::debug;

use crate::backend::{Backend, HandleId, OptionDescriptor};

/// Snapshot of the active device's option descriptors.
///
/// Rebuilt whenever the device changes or the backend asks for a reload.
#[derive(Debug, Default, Clone)]
pub struct OptionIndex {
    /// Descriptor of option `i` at position `i - 1`.
    descriptors: Vec<OptionDescriptor>,
    by_name: HashMap<String, usize>,
}

impl OptionIndex {
    /// Walk the option list from index 1 until the backend runs out.
    pub fn build<B: Backend>(backend: &B, handle: HandleId) -> Self {
        let descriptors: Vec<_> = (1..)
            .map_while(|i| backend.option_descriptor(handle, i))
            .collect();
        let by_name = descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.name.is_empty())
            .map(|(i, d)| (d.name.clone(), i + 1))
            .collect();
        debug!(count = descriptors.len(), "Option index built");
        Self {
            descriptors,
            by_name,
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn descriptor(&self, index: usize) -> Option<&OptionDescriptor> {
        index.checked_sub(1).and_then(|i| self.descriptors.get(i))
    }

    /// Index and descriptor of the option called `name`.
    pub fn lookup(&self, name: &str) -> Option<(usize, &OptionDescriptor)> {
        let index = self.find(name)?;
        Some((index, self.descriptor(index)?))
    }

    /// Like `lookup`, but only if the option is currently active.
    pub fn active(&self, name: &str) -> Option<(usize, &OptionDescriptor)> {
        self.lookup(name).filter(|(_, d)| d.caps.active)
    }

    /// All options with their 1-based index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &OptionDescriptor)> {
        self.descriptors.iter().enumerate().map(|(i, d)| (i + 1, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{OptionKind, SimulatedBackend};

    #[test]
    fn test_index_is_one_based() {
        let backend = SimulatedBackend::new();
        let h = backend.open("sim:flatbed", None).unwrap();
        let index = OptionIndex::build(&backend, h);
        assert_eq!(index.find("mode"), Some(2));
        let (i, desc) = index.lookup("resolution").unwrap();
        assert_eq!(index.descriptor(i), Some(desc));
        assert!(index.descriptor(0).is_none());
        assert!(index.find("x-resolution").is_none());
    }

    #[test]
    fn test_groups_are_not_named() {
        let backend = SimulatedBackend::new();
        let h = backend.open("sim:flatbed", None).unwrap();
        let index = OptionIndex::build(&backend, h);
        assert!(index.find("").is_none());
        let groups = index
            .iter()
            .filter(|(_, d)| d.kind == OptionKind::Group)
            .count();
        assert_eq!(groups, 3);
    }
}
