pub mod namer;
pub mod resolver;

pub use namer::CollisionNamer;
pub use resolver::{
    collect_groups, group_by_hash, resolve_all, resolve_group, GroupMap, HashGroup, Resolution,
};
