use super::entity::{Entity, EntityParser};
use crate::{config::LightMode, WarnCategory, WarnOnce};
use glam::Vec3;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::Hasher as _;

pub const MIN_LIGHT_RADIUS: f32 = 16.0;
pub const MAX_LIGHT_RADIUS: f32 = 131072.0;
/// Radius reported for directional lights, which do not attenuate.
pub const DIRECTIONAL_RADIUS: f32 = 1.0e30;

const DEFAULT_INTENSITY: f32 = 300.0;
const DEFAULT_SPOT_ANGLE: f32 = 45.0;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[repr(u32)]
pub enum SceneLightKind {
    Point = 0,
    Spot = 1,
    Directional = 2,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneLight {
    pub kind: SceneLightKind,
    pub origin: Vec3,
    /// Direction the light travels in, for spot and directional lights.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    pub spot_cos: f32,
    pub casts_shadows: bool,
    pub is_static: bool,
}

fn clamp_radius(radius: f32) -> f32 {
    if radius.is_nan() {
        MIN_LIGHT_RADIUS
    } else {
        radius.clamp(MIN_LIGHT_RADIUS, MAX_LIGHT_RADIUS)
    }
}

impl SceneLight {
    pub fn point(origin: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self {
            kind: SceneLightKind::Point,
            origin,
            direction: Vec3::NEG_Z,
            color,
            intensity,
            radius: clamp_radius(radius),
            spot_cos: -1.0,
            casts_shadows: true,
            is_static: false,
        }
    }

    pub fn spot(
        origin: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        radius: f32,
        spot_cos: f32,
    ) -> Self {
        Self {
            kind: SceneLightKind::Spot,
            direction: direction.try_normalize().unwrap_or(Vec3::NEG_Z),
            spot_cos: spot_cos.clamp(-1.0, 1.0),
            ..Self::point(origin, color, intensity, radius)
        }
    }

    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: SceneLightKind::Directional,
            origin: Vec3::ZERO,
            direction: direction.try_normalize().unwrap_or(Vec3::NEG_Z),
            color,
            intensity,
            radius: DIRECTIONAL_RADIUS,
            spot_cos: -1.0,
            casts_shadows: true,
            is_static: false,
        }
    }

    /// Direction from `position` towards the light, the distance, and the
    /// attenuation factor. `None` when the light cannot reach `position`.
    pub fn illuminate(&self, position: Vec3) -> Option<(Vec3, f32, f32)> {
        match self.kind {
            SceneLightKind::Directional => Some((-self.direction, DIRECTIONAL_RADIUS, 1.0)),
            SceneLightKind::Point | SceneLightKind::Spot => {
                let offset = self.origin - position;
                let distance = offset.length();
                if distance > self.radius || distance <= 0.0 {
                    return None;
                }
                let to_light = offset / distance;
                if self.kind == SceneLightKind::Spot && (-to_light).dot(self.direction) < self.spot_cos
                {
                    return None;
                }
                let falloff = 1.0 - distance / self.radius;
                Some((to_light, distance, falloff * falloff))
            }
        }
    }

    pub fn to_gpu(&self) -> GpuSceneLight {
        let mut flags = 0;
        if self.casts_shadows {
            flags |= GpuSceneLight::CASTS_SHADOWS;
        }
        if self.is_static {
            flags |= GpuSceneLight::STATIC;
        }
        GpuSceneLight {
            origin: self.origin.into(),
            kind: self.kind as u32,
            direction: self.direction.into(),
            intensity: self.intensity,
            color: self.color.into(),
            radius: self.radius,
            spot_cos: self.spot_cos,
            flags,
            pad: [0; 2],
        }
    }
}

/// Scene light record as laid out in the storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Zeroable, bytemuck::Pod)]
pub struct GpuSceneLight {
    pub origin: [f32; 3],
    pub kind: u32,
    pub direction: [f32; 3],
    pub intensity: f32,
    pub color: [f32; 3],
    pub radius: f32,
    pub spot_cos: f32,
    pub flags: u32,
    pub pad: [u32; 2],
}

impl GpuSceneLight {
    pub const CASTS_SHADOWS: u32 = 1;
    pub const STATIC: u32 = 2;
}

/// Light of the engine's per-frame dynamic set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DynamicLight {
    Omni {
        origin: Vec3,
        color: Vec3,
        intensity: f32,
        radius: f32,
    },
    Projected {
        origin: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        radius: f32,
        spot_cos: f32,
    },
    Directional {
        direction: Vec3,
        color: Vec3,
        intensity: f32,
    },
    Ambient {
        color: Vec3,
        intensity: f32,
    },
    Fog {
        color: Vec3,
        density: f32,
    },
}

impl DynamicLight {
    /// Map to a scene light. Fog and lights without energy are rejected.
    pub fn to_scene_light(&self) -> Option<SceneLight> {
        let light = match *self {
            Self::Omni {
                origin,
                color,
                intensity,
                radius,
            } => SceneLight::point(origin, color, intensity, radius),
            Self::Projected {
                origin,
                direction,
                color,
                intensity,
                radius,
                spot_cos,
            } => SceneLight::spot(origin, direction, color, intensity, radius, spot_cos),
            Self::Directional {
                direction,
                color,
                intensity,
            } => SceneLight::directional(direction, color, intensity),
            Self::Ambient { color, intensity } => SceneLight {
                casts_shadows: false,
                ..SceneLight::directional(Vec3::NEG_Z, color, intensity)
            },
            Self::Fog { .. } => return None,
        };
        if light.intensity > 0.0 {
            Some(light)
        } else {
            None
        }
    }
}

/// Content address of a packed light list.
pub fn hash_lights(records: &[GpuSceneLight]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytemuck::cast_slice(records));
    hasher.write_usize(records.len());
    hasher.finish()
}

/// The unified light array consumed by both tracing paths.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneLightList {
    lights: Vec<SceneLight>,
    records: Vec<GpuSceneLight>,
    hash: u64,
}

impl SceneLightList {
    pub fn build(dynamic: &[DynamicLight], static_lights: &[SceneLight], mode: LightMode) -> Self {
        let mut lights = Vec::new();
        if mode != LightMode::Off {
            lights.extend(dynamic.iter().filter_map(DynamicLight::to_scene_light));
        }
        if mode == LightMode::All {
            lights.extend(
                static_lights
                    .iter()
                    .filter(|light| light.intensity > 0.0)
                    .copied(),
            );
        }
        let records = lights.iter().map(SceneLight::to_gpu).collect::<Vec<_>>();
        let hash = hash_lights(&records);
        Self {
            lights,
            records,
            hash,
        }
    }

    pub fn lights(&self) -> &[SceneLight] {
        &self.lights
    }

    pub fn records(&self) -> &[GpuSceneLight] {
        &self.records
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }
}

fn parse_vec3(text: &str) -> Option<Vec3> {
    let mut parts = text.split_whitespace().map(str::parse::<f32>);
    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    let z = parts.next()?.ok()?;
    match parts.next() {
        None => Some(Vec3::new(x, y, z)),
        Some(_) => None,
    }
}

fn parse_float(entity: &Entity, key: &str) -> Result<Option<f32>, String> {
    match entity.get(key) {
        None => Ok(None),
        Some(text) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("bad `{}` value {:?}", key, text)),
    }
}

fn light_from_entity(
    entity: &Entity,
    targets: &FxHashMap<&str, Vec3>,
) -> Result<Option<SceneLight>, String> {
    let origin = match entity.get("origin") {
        Some(text) => parse_vec3(text).ok_or_else(|| format!("bad origin {:?}", text))?,
        None => return Err("light without origin".to_string()),
    };
    let intensity = parse_float(entity, "light")?.unwrap_or(DEFAULT_INTENSITY);
    if intensity <= 0.0 {
        return Ok(None);
    }
    let mut color = match entity.get("_color") {
        Some(text) => parse_vec3(text).ok_or_else(|| format!("bad color {:?}", text))?,
        None => Vec3::ONE,
    };
    let max = color.max_element();
    color = if max > 0.0 { color / max } else { Vec3::ONE };
    let radius = parse_float(entity, "radius")?.unwrap_or(intensity);

    let mut light = match entity.get("target") {
        Some(target) => {
            let direction = targets
                .get(target)
                .map(|&point| point - origin)
                .and_then(Vec3::try_normalize)
                .unwrap_or(Vec3::NEG_Z);
            let angle = parse_float(entity, "angle")?.unwrap_or(DEFAULT_SPOT_ANGLE);
            SceneLight::spot(
                origin,
                direction,
                color,
                intensity,
                radius,
                angle.to_radians().cos(),
            )
        }
        None => SceneLight::point(origin, color, intensity, radius),
    };
    light.is_static = true;
    Ok(Some(light))
}

/// Parse static lights out of the world entity string.
///
/// Malformed entities are skipped, with the first failure logged.
pub fn extract_static_lights(entity_string: &str, warnings: &mut WarnOnce) -> Vec<SceneLight> {
    let mut entities = Vec::new();
    for result in EntityParser::new(entity_string) {
        match result {
            Ok(entity) => entities.push(entity),
            Err(error) => {
                if warnings.first(WarnCategory::ENTITY_PARSE) {
                    log::warn!("Skipping malformed entity: {}", error);
                }
            }
        }
    }

    let mut targets = FxHashMap::default();
    for entity in entities.iter() {
        if let (Some(name), Some(origin)) = (entity.get("targetname"), entity.get("origin")) {
            if let Some(point) = parse_vec3(origin) {
                targets.insert(name, point);
            }
        }
    }

    let mut lights = Vec::new();
    for entity in entities.iter() {
        let is_light = entity
            .get("classname")
            .is_some_and(|class| class.to_ascii_lowercase().contains("light"));
        if !is_light {
            continue;
        }
        match light_from_entity(entity, &targets) {
            Ok(Some(light)) => lights.push(light),
            Ok(None) => {}
            Err(reason) => {
                if warnings.first(WarnCategory::ENTITY_PARSE) {
                    log::warn!("Skipping light entity: {}", reason);
                }
            }
        }
    }
    log::info!("Extracted {} static lights", lights.len());
    lights
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTITIES: &str = r#"
{
"classname" "worldspawn"
"message" "test"
}
{
"classname" "light"
"origin" "0 0 128"
"light" "200"
"_color" "1 0.5 0.5"
}
{
"classname" "light"
"origin" "64 0 128"
"target" "spot_target"
"angle" "30"
}
{
"classname" "info_null"
"targetname" "spot_target"
"origin" "64 0 0"
}
{
"classname" "light"
"origin" "not a vector"
}
{
"classname" "light"
"origin" "0 0 0"
"light" "-5"
}
"#;

    #[test]
    fn extracts_point_and_spot_lights() {
        let mut warnings = WarnOnce::default();
        let lights = extract_static_lights(ENTITIES, &mut warnings);
        assert_eq!(lights.len(), 2);

        let point = &lights[0];
        assert_eq!(point.kind, SceneLightKind::Point);
        assert_eq!(point.intensity, 200.0);
        assert_eq!(point.radius, 200.0);
        assert_eq!(point.color, Vec3::new(1.0, 0.5, 0.5));
        assert!(point.is_static);

        let spot = &lights[1];
        assert_eq!(spot.kind, SceneLightKind::Spot);
        assert_eq!(spot.intensity, DEFAULT_INTENSITY);
        assert!((spot.direction - Vec3::NEG_Z).length() < 1e-6);
        assert!((spot.spot_cos - 30f32.to_radians().cos()).abs() < 1e-6);

        assert!(warnings.has_fired(WarnCategory::ENTITY_PARSE));
    }

    #[test]
    fn dynamic_mapping_rejects_fog_and_dark_lights() {
        let fog = DynamicLight::Fog {
            color: Vec3::ONE,
            density: 1.0,
        };
        assert!(fog.to_scene_light().is_none());
        let dark = DynamicLight::Omni {
            origin: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 0.0,
            radius: 100.0,
        };
        assert!(dark.to_scene_light().is_none());
        let ambient = DynamicLight::Ambient {
            color: Vec3::ONE,
            intensity: 0.5,
        }
        .to_scene_light()
        .unwrap();
        assert_eq!(ambient.kind, SceneLightKind::Directional);
        assert!(!ambient.casts_shadows);
        let tiny = DynamicLight::Omni {
            origin: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 1.0,
        }
        .to_scene_light()
        .unwrap();
        assert_eq!(tiny.radius, MIN_LIGHT_RADIUS);
    }

    #[test]
    fn point_attenuation_and_range() {
        let light = SceneLight::point(Vec3::ZERO, Vec3::ONE, 1.0, 100.0);
        let (_, distance, attenuation) = light.illuminate(Vec3::new(50.0, 0.0, 0.0)).unwrap();
        assert_eq!(distance, 50.0);
        assert!((attenuation - 0.25).abs() < 1e-6);
        assert!(light.illuminate(Vec3::new(150.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn spot_cone_limits_reach() {
        let light = SceneLight::spot(Vec3::ZERO, Vec3::NEG_Z, Vec3::ONE, 1.0, 1000.0, 0.9);
        assert!(light.illuminate(Vec3::new(0.0, 0.0, -100.0)).is_some());
        assert!(light.illuminate(Vec3::new(100.0, 0.0, -10.0)).is_none());
    }

    #[test]
    fn hash_is_stable_and_mode_dependent() {
        let dynamic = [DynamicLight::Omni {
            origin: Vec3::new(1.0, 2.0, 3.0),
            color: Vec3::ONE,
            intensity: 10.0,
            radius: 64.0,
        }];
        let a = SceneLightList::build(&dynamic, &[], LightMode::Dynamic);
        let b = SceneLightList::build(&dynamic, &[], LightMode::Dynamic);
        assert_eq!(a.hash(), b.hash());
        let off = SceneLightList::build(&dynamic, &[], LightMode::Off);
        assert!(off.is_empty());
        assert_ne!(a.hash(), off.hash());
    }
}
