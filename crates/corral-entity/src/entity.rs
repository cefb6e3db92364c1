use std::any::Any;

use crate::visitor::FieldVisitor;

/// A type that can live in the object graph store.
///
/// Implementations expose every persistent field — primary key,
/// attributes, and relation holders — to the visitor in a stable order.
/// The store derives all of its generic behavior from this one method:
/// relation endpoints are discovered by visiting a prototype instance,
/// transaction backups visit to capture values, rollback visits to
/// restore them, and the cascade algorithms visit to walk relations.
///
/// ```
/// use corral_entity::{Cascade, Entity, FieldVisitor, HasMany};
/// use corral_types::Identifier;
///
/// #[derive(Default)]
/// struct Album {
///     id: Identifier,
///     name: String,
///     tracks: HasMany<Track>,
/// }
///
/// #[derive(Default)]
/// struct Track {
///     id: Identifier,
///     title: String,
///     album: corral_entity::BelongsTo<Album>,
/// }
///
/// impl Entity for Album {
///     fn type_name(&self) -> &'static str {
///         "album"
///     }
///     fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
///         visitor.on_primary_key("id", &mut self.id);
///         visitor.on_attribute("name", &mut self.name);
///         visitor.on_has_many("tracks", &mut self.tracks, Cascade::All);
///     }
///     fn as_any(&self) -> &dyn std::any::Any {
///         self
///     }
///     fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
///         self
///     }
/// }
///
/// impl Entity for Track {
///     fn type_name(&self) -> &'static str {
///         "track"
///     }
///     fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
///         visitor.on_primary_key("id", &mut self.id);
///         visitor.on_attribute("title", &mut self.title);
///         visitor.on_belongs_to("album", &mut self.album, Cascade::None);
///     }
///     fn as_any(&self) -> &dyn std::any::Any {
///         self
///     }
///     fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
///         self
///     }
/// }
/// ```
pub trait Entity: Any {
    /// Stable name of this type, matching the name used at registration.
    fn type_name(&self) -> &'static str;

    /// Present every persistent field to the visitor, in declaration order.
    fn accept(&mut self, visitor: &mut dyn FieldVisitor);

    /// Upcast for downcasting; implementations return `self`.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting; implementations return `self`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Entity {
    /// Returns `true` if the erased entity is a `T`.
    pub fn is<T: Entity>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcast to a concrete entity type.
    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutable downcast to a concrete entity type.
    pub fn downcast_mut<T: Entity>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}
