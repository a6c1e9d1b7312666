//! Block index, difficulty retargeting and stake version voting.

pub mod blocknode;
pub mod difficulty;
pub mod index;
pub mod stakeversion;
pub mod state;

pub use blocknode::{BlockNode, NodeId, VoteVersion};
pub use index::{BlockIndex, BlockTree, NodeRef, MEDIAN_TIME_BLOCKS};
pub use state::{ChainError, ChainState, ChainTip};
