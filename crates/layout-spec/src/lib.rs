#![allow(missing_docs)]

pub mod assemble;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod lookups;
pub mod messages;
pub mod remote;
pub mod replay;
pub mod spec;
pub mod survey;
pub mod sync;
pub mod walker;

pub use assemble::{
    FormSchema, FormSection, Regions, SchemaMode, SchemaRequest, assemble_form_schema,
    spatial_system_control, strip_tags,
};
pub use config::{ContentUpdatePolicy, SyncPolicy, WarehouseSettings};
pub use descriptor::{
    BuildContext, FieldDescriptor, Validation, attach_grid_controls, build_field_descriptor,
    wrap_sub_samples,
};
pub use error::{LayoutError, RemoteError, SyncError};
pub use lookups::{Term, group_pages_for_user, survey_list, valid_taxon_attributes};
pub use messages::{Message, MessageLevel, Messages};
pub use remote::{Method, RemoteRequest, RemoteResourceClient, RemoteResponse};
pub use replay::{RecordedExchange, RecordedWarehouse};
pub use spec::{
    AttributeBinding, AttributeEntity, BindingPatch, Block, BlockConfig, BlockPosition,
    ControlKind, CreateOrExisting, DataType, FORM_CONTENT_TYPE, FormType, Page, RevisionInfo,
    SUBMIT_BUTTONS_BLOCK, Section,
};
pub use survey::SurveyProvisioner;
pub use sync::{AttributeSynchronizer, SyncReport};
pub use walker::{LayoutWalker, PlacedBlock};
