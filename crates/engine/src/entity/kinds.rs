use serde::{Deserialize, Serialize};

use super::{Body, Contact, EntityCommands, EntityKind};
use crate::coords::Vec3;

pub const TREE_CLASSNAME: &str = "tree";
pub const CRITTER_CLASSNAME: &str = "critter";

const TREE_SIZE: Vec3 = Vec3::new(1.0, 1.0, 2.0);
const CRITTER_SIZE: Vec3 = Vec3::new(0.6, 0.6, 0.8);

/// Static scenery placed by terrain generation. A tree stands on the integer
/// corner of its tile, so its anchor sits half a tile from the tile center.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    #[serde(default)]
    pub snowy: bool,
}

impl Tree {
    pub fn body_at_tile(x: i32, y: i32) -> Body {
        Body::new(Vec3::xy(x as f32, y as f32), TREE_SIZE, true)
    }
}

impl EntityKind for Tree {
    fn classname(&self) -> &'static str {
        TREE_CLASSNAME
    }

    fn anchor_offset(&self) -> f32 {
        0.5
    }

    fn save_fields(&self) -> serde_json::Value {
        serde_json::json!({ "snowy": self.snowy })
    }
}

/// Small wandering actor. On contact it backs out along its own velocity by
/// the share of the tick the sub-step covers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Critter {
    #[serde(default)]
    pub bumps: u32,
}

impl Critter {
    pub fn body_at(position: Vec3) -> Body {
        Body::new(position, CRITTER_SIZE, true)
    }
}

impl EntityKind for Critter {
    fn classname(&self) -> &'static str {
        CRITTER_CLASSNAME
    }

    fn on_collision(&mut self, body: &mut Body, contact: &Contact, _commands: &mut EntityCommands) {
        if !contact.other_solid {
            return;
        }
        self.bumps = self.bumps.saturating_add(1);
        body.position -= contact.own_velocity * contact.step_fraction;
    }

    fn save_fields(&self) -> serde_json::Value {
        serde_json::json!({ "bumps": self.bumps })
    }
}
