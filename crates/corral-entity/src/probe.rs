use std::any::TypeId;

use corral_types::{Identifier, IdentifierKind};

use crate::cascade::Cascade;
use crate::entity::Entity;
use crate::holder::{ManyHolder, RefHolder};
use crate::visitor::{AttributeValue, FieldVisitor};

/// Relation categories a field can declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
}

/// One relation field discovered on an entity type.
#[derive(Clone, Debug)]
pub struct RelationField {
    pub name: String,
    pub kind: RelationKind,
    /// `TypeId` of the related entity type.
    pub target: TypeId,
    /// Diagnostic name of the related entity type.
    pub target_name: &'static str,
    pub cascade: Cascade,
}

/// Everything the store learns about a type at attach time.
#[derive(Clone, Debug)]
pub struct EntityShape {
    /// Name of the primary-key field, if the type declares one.
    pub pk_name: Option<String>,
    /// Kind the primary key carried on the probe instance (usually
    /// `Unset` on a default-constructed prototype).
    pub pk_kind: IdentifierKind,
    /// Plain attribute field names, in declaration order.
    pub attributes: Vec<String>,
    /// Relation fields, in declaration order.
    pub relations: Vec<RelationField>,
}

impl EntityShape {
    /// Find a relation field by name.
    pub fn relation(&self, name: &str) -> Option<&RelationField> {
        self.relations.iter().find(|field| field.name == name)
    }
}

/// Visitor that records the field layout of a prototype instance.
struct FieldProbe {
    shape: EntityShape,
}

impl FieldVisitor for FieldProbe {
    fn on_primary_key(&mut self, name: &str, id: &mut Identifier) {
        self.shape.pk_name = Some(name.to_string());
        self.shape.pk_kind = id.kind();
    }

    fn on_attribute(&mut self, name: &str, _value: &mut dyn AttributeValue) {
        self.shape.attributes.push(name.to_string());
    }

    fn on_belongs_to(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        self.shape.relations.push(RelationField {
            name: name.to_string(),
            kind: RelationKind::BelongsTo,
            target: holder.target_type(),
            target_name: holder.target_type_name(),
            cascade,
        });
    }

    fn on_has_one(&mut self, name: &str, holder: &mut dyn RefHolder, cascade: Cascade) {
        self.shape.relations.push(RelationField {
            name: name.to_string(),
            kind: RelationKind::HasOne,
            target: holder.target_type(),
            target_name: holder.target_type_name(),
            cascade,
        });
    }

    fn on_has_many(&mut self, name: &str, holder: &mut dyn ManyHolder, cascade: Cascade) {
        self.shape.relations.push(RelationField {
            name: name.to_string(),
            kind: RelationKind::HasMany,
            target: holder.target_type(),
            target_name: holder.target_type_name(),
            cascade,
        });
    }
}

/// Discover the field layout of an entity by visiting it once.
///
/// The store runs this over a prototype instance at attach time; the
/// resulting shape drives relation-endpoint registration.
pub fn probe_shape(entity: &mut dyn Entity) -> EntityShape {
    let mut probe = FieldProbe {
        shape: EntityShape {
            pk_name: None,
            pk_kind: IdentifierKind::Unset,
            attributes: Vec::new(),
            relations: Vec::new(),
        },
    };
    entity.accept(&mut probe);
    probe.shape
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::{BelongsTo, HasMany};

    #[derive(Default)]
    struct Author {
        id: Identifier,
        name: String,
        posts: HasMany<Post>,
    }

    #[derive(Default)]
    struct Post {
        id: Identifier,
        title: String,
        author: BelongsTo<Author>,
    }

    impl Entity for Author {
        fn type_name(&self) -> &'static str {
            "author"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
            visitor.on_attribute("name", &mut self.name);
            visitor.on_has_many("posts", &mut self.posts, Cascade::All);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    impl Entity for Post {
        fn type_name(&self) -> &'static str {
            "post"
        }

        fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
            visitor.on_primary_key("id", &mut self.id);
            visitor.on_attribute("title", &mut self.title);
            visitor.on_belongs_to("author", &mut self.author, Cascade::None);
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn probe_records_pk_attributes_and_relations() {
        let mut author = Author::default();
        let shape = probe_shape(&mut author);

        assert_eq!(shape.pk_name.as_deref(), Some("id"));
        assert_eq!(shape.attributes, vec!["name".to_string()]);
        assert_eq!(shape.relations.len(), 1);

        let posts = shape.relation("posts").unwrap();
        assert_eq!(posts.kind, RelationKind::HasMany);
        assert_eq!(posts.target, TypeId::of::<Post>());
        assert_eq!(posts.cascade, Cascade::All);
    }

    #[test]
    fn probe_records_belongs_to() {
        let mut post = Post::default();
        let shape = probe_shape(&mut post);

        let author = shape.relation("author").unwrap();
        assert_eq!(author.kind, RelationKind::BelongsTo);
        assert_eq!(author.target, TypeId::of::<Author>());
        assert_eq!(author.cascade, Cascade::None);
    }

    #[test]
    fn probe_missing_relation_returns_none() {
        let mut post = Post::default();
        let shape = probe_shape(&mut post);
        assert!(shape.relation("nope").is_none());
    }
}
