use corral_types::{Identifier, ProxyKey};

use crate::cascade::Cascade;
use crate::entity::Entity;
use crate::holder::BelongsTo;
use crate::visitor::FieldVisitor;

/// Synthetic join entity modeling a many-to-many relation.
///
/// A many-to-many between `L` and `R` is two one-to-many relations onto
/// a join type: each side declares a `HasMany<JoinEntity<L, R>>`
/// container, and the join's two belongs-to halves mirror into them
/// through the ordinary endpoint cascade. Pushing a join that names only
/// the far side is enough — the near belongs-to is filled by the
/// container's own mirror when the owner is inserted.
///
/// ```
/// use corral_entity::{Cascade, Entity, FieldVisitor, HasMany, JoinEntity};
/// use corral_types::Identifier;
///
/// #[derive(Default)]
/// struct Student {
///     id: Identifier,
///     courses: HasMany<JoinEntity<Student, Course>>,
/// }
///
/// #[derive(Default)]
/// struct Course {
///     id: Identifier,
///     students: HasMany<JoinEntity<Student, Course>>,
/// }
/// # impl Entity for Student {
/// #     fn type_name(&self) -> &'static str { "student" }
/// #     fn accept(&mut self, v: &mut dyn FieldVisitor) {
/// #         v.on_primary_key("id", &mut self.id);
/// #         v.on_has_many("courses", &mut self.courses, Cascade::All);
/// #     }
/// #     fn as_any(&self) -> &dyn std::any::Any { self }
/// #     fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
/// # }
/// # impl Entity for Course {
/// #     fn type_name(&self) -> &'static str { "course" }
/// #     fn accept(&mut self, v: &mut dyn FieldVisitor) {
/// #         v.on_primary_key("id", &mut self.id);
/// #         v.on_has_many("students", &mut self.students, Cascade::All);
/// #     }
/// #     fn as_any(&self) -> &dyn std::any::Any { self }
/// #     fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
/// # }
/// ```
pub struct JoinEntity<L: Entity, R: Entity> {
    pub id: Identifier,
    pub left: BelongsTo<L>,
    pub right: BelongsTo<R>,
}

impl<L: Entity, R: Entity> JoinEntity<L, R> {
    /// Join entry pointing at an already-stored right-hand object; the
    /// left half is wired by the owning container on insert.
    pub fn to_key(right: ProxyKey) -> Self {
        Self {
            id: Identifier::Unset,
            left: BelongsTo::new(),
            right: BelongsTo::with_key(right),
        }
    }

    /// Join entry carrying a not-yet-stored right-hand object.
    pub fn to(right: R) -> Self {
        Self {
            id: Identifier::Unset,
            left: BelongsTo::new(),
            right: BelongsTo::with(right),
        }
    }

    /// Mirror of [`to_key`](Self::to_key) for the right-hand container.
    pub fn from_key(left: ProxyKey) -> Self {
        Self {
            id: Identifier::Unset,
            left: BelongsTo::with_key(left),
            right: BelongsTo::new(),
        }
    }
}

impl<L: Entity, R: Entity> Default for JoinEntity<L, R> {
    fn default() -> Self {
        Self {
            id: Identifier::Unset,
            left: BelongsTo::new(),
            right: BelongsTo::new(),
        }
    }
}

impl<L: Entity, R: Entity> Entity for JoinEntity<L, R> {
    fn type_name(&self) -> &'static str {
        "join"
    }

    fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
        visitor.on_primary_key("id", &mut self.id);
        // detached halves ride along when a container cascades the join
        visitor.on_belongs_to("left", &mut self.left, Cascade::Insert);
        visitor.on_belongs_to("right", &mut self.right, Cascade::Insert);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
