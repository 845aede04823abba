use std::any::TypeId;
use std::collections::HashSet;

use super::MetadataTable;

/// Every own and inherited method name along `chain`, each exactly once.
///
/// Order is deterministic: declaration order of the first type, then the methods
/// each base adds, walking the chain front to back.
pub fn scan_methods(table: &MetadataTable, chain: &[TypeId]) -> Vec<&'static str> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for decl in chain.iter().filter_map(|ty| table.type_decl(*ty)) {
        for m in &decl.methods {
            if seen.insert(m.name) {
                names.push(m.name);
            }
        }
    }
    names
}
