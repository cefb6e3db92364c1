//! Entity types shared by this crate's test modules.

use corral_entity::{BelongsTo, Cascade, Entity, FieldVisitor, HasMany, HasOne};
use corral_types::Identifier;

use crate::graph::ObjectGraph;

#[derive(Default)]
pub struct Album {
    pub id: Identifier,
    pub name: String,
    pub tracks: HasMany<Track>,
}

#[derive(Default)]
pub struct Track {
    pub id: Identifier,
    pub title: String,
    pub album: BelongsTo<Album>,
}

impl Entity for Album {
    fn type_name(&self) -> &'static str {
        "album"
    }

    fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
        visitor.on_primary_key("id", &mut self.id);
        visitor.on_attribute("name", &mut self.name);
        visitor.on_has_many("tracks", &mut self.tracks, Cascade::All);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl Entity for Track {
    fn type_name(&self) -> &'static str {
        "track"
    }

    fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
        visitor.on_primary_key("id", &mut self.id);
        visitor.on_attribute("title", &mut self.title);
        visitor.on_belongs_to("album", &mut self.album, Cascade::None);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Default)]
pub struct Person {
    pub id: Identifier,
    pub name: String,
    pub profile: HasOne<Profile>,
}

#[derive(Default)]
pub struct Profile {
    pub id: Identifier,
    pub bio: String,
    pub person: BelongsTo<Person>,
}

impl Entity for Person {
    fn type_name(&self) -> &'static str {
        "person"
    }

    fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
        visitor.on_primary_key("id", &mut self.id);
        visitor.on_attribute("name", &mut self.name);
        visitor.on_has_one("profile", &mut self.profile, Cascade::All);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl Entity for Profile {
    fn type_name(&self) -> &'static str {
        "profile"
    }

    fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
        visitor.on_primary_key("id", &mut self.id);
        visitor.on_attribute("bio", &mut self.bio);
        visitor.on_belongs_to("person", &mut self.person, Cascade::None);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Default)]
pub struct Badge {
    pub id: Identifier,
    pub code: String,
}

#[derive(Default)]
pub struct Employee {
    pub id: Identifier,
    pub name: String,
    pub badge: HasOne<Badge>,
}

impl Entity for Badge {
    fn type_name(&self) -> &'static str {
        "badge"
    }

    fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
        visitor.on_primary_key("id", &mut self.id);
        visitor.on_attribute("code", &mut self.code);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl Entity for Employee {
    fn type_name(&self) -> &'static str {
        "employee"
    }

    fn accept(&mut self, visitor: &mut dyn FieldVisitor) {
        visitor.on_primary_key("id", &mut self.id);
        visitor.on_attribute("name", &mut self.name);
        visitor.on_has_one("badge", &mut self.badge, Cascade::All);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Graph with the one-directional employee/badge pair attached (the
/// badge has no back-reference field).
pub fn employee_badge_graph() -> ObjectGraph {
    let mut graph = ObjectGraph::new();
    graph.attach_type::<Employee>("employee", None).unwrap();
    graph.attach_type::<Badge>("badge", None).unwrap();
    graph
}

/// Graph with the album/track pair attached (bidirectional relation).
pub fn album_track_graph() -> ObjectGraph {
    let mut graph = ObjectGraph::new();
    graph.attach_type::<Album>("album", None).unwrap();
    graph.attach_type::<Track>("track", None).unwrap();
    graph
}

/// Graph with the person/profile pair attached (has-one relation).
pub fn person_profile_graph() -> ObjectGraph {
    let mut graph = ObjectGraph::new();
    graph.attach_type::<Person>("person", None).unwrap();
    graph.attach_type::<Profile>("profile", None).unwrap();
    graph
}
