#![warn(unused_extern_crates)]
pub use glam;

mod error;
pub use error::{ Error, Result };

mod index;
pub use index::*;

pub mod morton;

mod bbox;
pub use bbox::*;

mod point_cloud;
pub use point_cloud::*;

pub mod octree;
pub use octree::{ Level, Node, Octree };

pub mod codec;
pub use codec::*;

pub mod counter;
pub use counter::StepCounter;

mod utils;
