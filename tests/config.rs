mod common;

use common::{init_logger, shader_library};
use prism::{
    config::{BackendPolicy, Composite, ConfigError, LightMode},
    gpu, Backend, Config, CoreContext, Error,
};
use std::io::Write as _;

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

#[test]
fn load_fills_defaults_and_clamps() {
    init_logger();
    let file = write_config(
        r#"(
            backend: software,
            mode: all,
            bounces: 40,
            hybrid_intensity: 12.5,
            composite: hybrid,
            validate_maps: ["q3dm6"],
            shader_path: "assets/spirv",
        )"#,
    );
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.backend, BackendPolicy::Software);
    assert_eq!(config.mode, LightMode::All);
    assert_eq!(config.bounces, prism::config::MAX_BOUNCES);
    assert_eq!(config.hybrid_intensity, prism::config::MAX_HYBRID_INTENSITY);
    assert_eq!(config.composite, Composite::Hybrid);
    assert!(config.is_validate_map("Q3DM6"));
    assert!(!config.is_validate_map("q3dm1"));
    assert_eq!(config.shader_path, std::path::Path::new("assets/spirv"));
    assert_eq!(config.samples, 1);
    assert!(config.temporal);
}

#[test]
fn load_reports_bad_documents() {
    let file = write_config("(bounces: \"many\")");
    assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse(_))));

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.ron");
    assert!(matches!(Config::load(&missing), Err(ConfigError::Io(_))));
}

#[test]
fn console_updates_are_validated() {
    let mut core = CoreContext::with_library(Config::default(), shader_library());
    match core.set_config("bogus", "1") {
        Err(Error::Config(ConfigError::UnknownParameter(name))) => assert_eq!(name, "bogus"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        core.set_config("backend", "quantum"),
        Err(Error::Config(ConfigError::InvalidValue { .. }))
    ));
    assert!(core.set_config("reflex", "maybe").is_err());
    assert_eq!(*core.config(), Config::default());

    core.set_config("hybrid_intensity", "-3").unwrap();
    assert_eq!(core.config().hybrid_intensity, 0.0);
    core.set_config("samples", "0").unwrap();
    assert_eq!(core.config().samples, 1);
    core.set_config("mode", "off").unwrap();
    assert_eq!(core.config().mode, LightMode::Off);
    core.set_config("temporal", "off").unwrap();
    assert!(!core.config().temporal);
}

#[test]
fn reconfiguring_picks_the_backend_again() {
    let gpu = gpu::null::Context::default();
    let mut core = CoreContext::with_library(Config::default(), shader_library());
    assert_eq!(core.get_backend_status(), "uninitialized");
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Hardware);
    assert!(core.renderer().is_some());

    core.replace_config(Config {
        backend: BackendPolicy::Software,
        ..Config::default()
    });
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Software);
    assert!(core.renderer().is_none());
    assert_eq!(core.get_backend_status(), "software (requested)");

    core.set_config("backend", "hardware").unwrap();
    assert_eq!(core.begin_frame(&gpu, &[]), Backend::Hardware);
    assert_eq!(core.get_backend_status(), "hardware");
}

#[test]
fn quality_change_rebuilds_the_pipeline() {
    let gpu = gpu::null::Context::default();
    let mut core = CoreContext::with_library(Config::default(), shader_library());
    core.begin_frame(&gpu, &[]);
    assert_eq!(core.renderer().unwrap().pipeline().quality(), 2);
    core.set_config("quality", "4").unwrap();
    core.set_config("bounces", "3").unwrap();
    core.begin_frame(&gpu, &[]);
    let pipeline = core.renderer().unwrap().pipeline();
    assert_eq!(pipeline.quality(), 4);
    assert_eq!(pipeline.max_recursion_depth(), 3);
}
