//! YAML scene documents: declarative world seeds for the CLI.

use anyhow::Context;
use glam::Vec3;
use serde::Deserialize;
use std::collections::BTreeMap;
use weald_common::{AttrMap, EntityId, SimConfig};
use weald_kernel::{EntityKind, Router};

/// A world-seed document.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneDoc {
    #[serde(default)]
    pub config: SimConfig,
    #[serde(default)]
    pub entities: Vec<SceneEntity>,
}

/// One entity declaration. Parents are referenced by name and must be
/// declared earlier in the document; entities without a parent land
/// under the world root.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneEntity {
    pub name: String,
    #[serde(default)]
    pub kind: SceneKind,
    pub parent: Option<String>,
    pub position: Option<[f32; 3]>,
    pub velocity: Option<[f32; 3]>,
    #[serde(default)]
    pub box_size: f32,
    #[serde(default)]
    pub attrs: AttrMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneKind {
    #[default]
    Thing,
    Creature,
}

impl From<SceneKind> for EntityKind {
    fn from(kind: SceneKind) -> Self {
        match kind {
            SceneKind::Thing => EntityKind::Thing,
            SceneKind::Creature => EntityKind::Creature,
        }
    }
}

pub fn parse(text: &str) -> anyhow::Result<SceneDoc> {
    serde_yaml::from_str(text).context("failed to parse scene document")
}

/// Build a router from a scene, returning the name → id mapping.
pub fn build(scene: &SceneDoc) -> anyhow::Result<(Router, BTreeMap<String, EntityId>)> {
    let mut router = Router::new(scene.config);
    let root = router.world().root();
    let mut names: BTreeMap<String, EntityId> = BTreeMap::new();

    for decl in &scene.entities {
        let parent = match &decl.parent {
            Some(name) => *names
                .get(name)
                .with_context(|| format!("entity {:?} names unknown parent {:?}", decl.name, name))?,
            None => root,
        };
        let id = router.spawn(decl.kind.into(), parent)?;
        let entity = router
            .world_mut()
            .get_mut(id)
            .expect("entity spawned above");
        if let Some(position) = decl.position {
            entity.position = Vec3::from(position);
        }
        if let Some(velocity) = decl.velocity {
            entity.velocity = Some(Vec3::from(velocity));
        }
        entity.box_size = decl.box_size;
        entity.merge(&decl.attrs);
        names.insert(decl.name.clone(), id);
    }
    Ok((router, names))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"
config:
  move_tick: 1.0
entities:
  - name: meadow
    box_size: 100
    attrs:
      floor: 0.0
  - name: wanderer
    kind: creature
    parent: meadow
    position: [0, 0, 0]
    velocity: [1, 0, 0]
    box_size: 1
    attrs:
      mass: 80
"#;

    #[test]
    fn parses_and_builds() {
        let scene = parse(SCENE).unwrap();
        assert_eq!(scene.config.move_tick, 1.0);
        assert_eq!(scene.entities.len(), 2);

        let (router, names) = build(&scene).unwrap();
        let wanderer = names["wanderer"];
        let entity = router.world().get(wanderer).unwrap();
        assert_eq!(entity.kind, EntityKind::Creature);
        assert_eq!(entity.parent, Some(names["meadow"]));
        assert_eq!(entity.velocity, Some(Vec3::new(1.0, 0.0, 0.0)));
        assert_eq!(entity.mass, 80.0);
    }

    #[test]
    fn unknown_parent_is_an_error() {
        let scene = parse(
            "entities:\n  - name: lost\n    parent: nowhere\n",
        )
        .unwrap();
        assert!(build(&scene).is_err());
    }

    #[test]
    fn attrs_parse_as_untagged_values() {
        let scene = parse(
            "entities:\n  - name: fire\n    attrs:\n      status: 0.5\n      mode: fixed\n",
        )
        .unwrap();
        let attrs = &scene.entities[0].attrs;
        assert_eq!(attrs["status"].as_f64(), Some(0.5));
        assert_eq!(attrs["mode"].as_str(), Some("fixed"));
    }
}
