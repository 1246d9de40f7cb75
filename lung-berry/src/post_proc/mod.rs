//! 后处理流程集合.

mod components;
mod composite;

pub use components::{
    label_components, ranking, select, Components, Connectivity, Ranked, SelectionPolicy,
};

pub use composite::{composite, confine};
