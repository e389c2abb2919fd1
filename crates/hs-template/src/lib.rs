//! # hs-template
//!
//! Program templates for Hypersweep.
//!
//! A [`Template`] is an ordered list of literal text and named markers, built
//! either with [`TemplateBuilder`] or by parsing the `{{name:context}}` template
//! language. An [`Expander`] turns a template plus one [`hs_types::Assignment`]
//! into concrete program text, rendering each value as a literal of the chosen
//! [`Dialect`] or as a lookup into a runtime configuration binding.

mod expand;
mod render;
mod template;

pub use expand::{ExpansionMode, Expander};
pub use render::{render_float, render_value, Dialect};
pub use template::{Marker, MarkerContext, Segment, Template, TemplateBuilder};
