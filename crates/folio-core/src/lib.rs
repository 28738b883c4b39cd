//! Pure building blocks of the consistency layer: the selector compiler, the
//! publish-eligibility rules and the reactive cell graph.

pub mod compile;
pub mod eligibility;
pub mod error;
pub mod field;
pub mod predicate;
pub mod reactive;
pub mod selector;

pub use compile::{compile, CompiledSelector};
pub use eligibility::{access_selector, build_eligibility, eligibility_selector};
pub use error::CompileError;
pub use field::{Field, FieldType, FieldValue};
pub use predicate::{AlwaysTrue, And, Not, Or, Predicate};
pub use reactive::{Cell, Subscription};
pub use selector::Selector;
