//! Host plan parsing and normalization for hostprep.
//!
//! This crate defines the schema layer: TOML host plan parsing (`HostPlan`),
//! the validated `NormalizedPlan` consumed by the engine, include-directory
//! file patterns, and the built-in default plan.

pub mod defaults;
pub mod normalize;
pub mod pattern;
pub mod plan;

pub use defaults::{DEFAULT_PLAN, DEFAULT_PLAN_PATH};
pub use normalize::{
    AptSource, DirectiveSpec, LiveCheck, NormalizedPlan, RepositorySpec, ServiceSpec, ToolSpec,
};
pub use pattern::FilePattern;
pub use plan::{
    parse_plan_file, parse_plan_str, AccountSection, AptSourceSection, DirectiveSection, HostPlan,
    PlanError, PreconditionSection, RepositorySection, ServiceSection, ToolSection,
};
