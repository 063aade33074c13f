#![forbid(unsafe_code)]

pub mod announcement_board;
pub mod canteen_board;
pub mod classroom_board;
pub mod config;
pub mod error;
pub mod faculty_board;
pub mod feedback_board;
pub mod list_store;
pub mod live;
pub mod notice;
pub mod notification_center;
pub mod optimistic;
pub mod reconcile;

pub use config::{FeedMode, LiveListConfig};
pub use error::ListStoreError;
pub use list_store::{ListSnapshot, ListStoreState, RealtimeListStore};
pub use live::{IssuedMutation, LiveBackend, LiveList, MutationResolution};
pub use notice::ListNotice;
pub use optimistic::{OptimisticMutationTracker, RollbackHandle};
pub use reconcile::{reconcile, OrderedEntityMap};
