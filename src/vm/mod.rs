//! The binding interface. A runtime embeds the collector by implementing [`VMBinding`] and the
//! traits it names; the collector never looks at object payloads in any other way.

mod collection;
mod object_model;
mod scanning;
mod slot;

pub use self::collection::Collection;
pub use self::object_model::ObjectModel;
pub use self::scanning::Scanning;
pub use self::scanning::SlotVisitor;
pub use self::slot::Slot;

/// The `VMBinding` trait associates with each trait the binding implements.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync + Default,
{
    type VMObjectModel: ObjectModel<Self>;
    type VMScanning: Scanning<Self>;
    type VMCollection: Collection<Self>;
}
