use std::path::{Component, Path};

/// Whether `path`, once lexically cleaned, still climbs into a parent directory.
///
/// `a/../b` cleans to `b` and is fine, `./../secret` is not. A `..` directly below the root is
/// dropped, as the root is its own parent.
pub(crate) fn traverses_parent(path: &Path) -> bool {
    let mut depth: usize = 0;
    let mut rooted = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => rooted = true,
            Component::CurDir => {}
            Component::Normal(_) => depth += 1,
            Component::ParentDir => match depth {
                0 if rooted => {}
                0 => return true,
                _ => depth -= 1,
            },
        }
    }
    false
}
