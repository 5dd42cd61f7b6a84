//! Live panels of the Agri-Bot dashboard: mirrors of remote paths,
//! guarded pump controllers, and the widget view models built from them.

pub mod actuator;
pub mod dashboard;
pub mod mirror;
pub mod registry;
pub mod widget;

pub use actuator::{
    ActuatorCommandState, ActuatorController, CommandError, CommandResult, ToggleRequest, Toggled,
};
pub use dashboard::{AuditRow, Dashboard};
pub use mirror::{Observer, RemoteValueMirror};
pub use registry::ControllerRegistry;
pub use widget::{
    ChannelKind, ChannelSnapshot, ChannelSpec, Headline, PanelContext, WidgetSnapshot, WidgetSpec,
    WidgetViewModel,
};
