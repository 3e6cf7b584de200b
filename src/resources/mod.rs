pub mod app_config;
pub mod common;
pub mod deployment;
pub mod exposure;
pub mod secret;
pub mod service;
pub mod statefulset;

pub use common::{
    API_VERSION, APP_LABEL, BuildContext, DESIRED_STATE_ANNOTATION, FIELD_MANAGER, KIND,
    owner_reference, standard_labels,
};
