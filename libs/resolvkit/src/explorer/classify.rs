use crate::descriptor::HandlerRole;

/// Whether a discovered handler is registered by the explorer.
///
/// First match decides: unclassified handlers are kept, delegated handlers are kept,
/// root operations are kept, and anything else is kept unless it is a plain field
/// resolver (those are wired by the schema layer directly).
pub fn include(role: HandlerRole, is_delegated: bool, is_field_resolver: bool) -> bool {
    if role == HandlerRole::Unclassified {
        return true;
    }
    if is_delegated {
        return true;
    }
    if role.is_root_operation() {
        return true;
    }
    !is_field_resolver
}
