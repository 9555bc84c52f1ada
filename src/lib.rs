//! Merges per-object effect graph references into one content-addressed
//! graph and gathers the flat uniform/binding lists a shader generator and
//! renderer need to bind it. See `README`-equivalent module docs below for
//! how the pieces fit together: `registry` + `fragment_parser` declare what
//! node types exist; `graph` loads authored instances of them; `merge`
//! folds several instances into one; `hash` assigns every node and graph a
//! stable identity; `inputs` turns a merged graph into bindable uniforms.

pub mod cache;
pub mod dynamic_param;
pub mod error;
pub mod fragment_parser;
pub mod graph;
pub mod hash;
pub mod inputs;
pub mod interner;
pub mod merge;
pub mod param;
pub mod registry;
pub mod stage;
