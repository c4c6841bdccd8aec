pub mod binding;
pub mod kind;
pub mod page;

pub use binding::{AttributeBinding, BindingPatch, CreateOrExisting};
pub use kind::{AttributeEntity, ControlKind, DataType, SUBMIT_BUTTONS_BLOCK};
pub use page::{
    Block, BlockConfig, BlockPosition, FORM_CONTENT_TYPE, FormType, Page, RevisionInfo, Section,
};
