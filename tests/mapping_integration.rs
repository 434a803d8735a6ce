//! Mapping loading integration tests
//!
//! Loads the fixture project (one module plus the main project) through the
//! configuration layer and checks the resolved attribute tables.

use std::path::PathBuf;
use std::sync::Arc;

use fieldgate::{
    FieldGateConfig, MappingDefinition, MappingError, MappingRegistry, PathResolver,
    SchemaRegistry,
};
use pretty_assertions::assert_eq;

const BOOK: &str = "App\\Entity\\Book";
const BASE: &str = "App\\Entity\\Book:item.normalization.get";

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load() -> MappingRegistry {
    let config = FieldGateConfig::load(fixtures().join("fieldgate.yaml")).unwrap();
    let schema = SchemaRegistry::load(config.schema_file.as_ref().unwrap()).unwrap();
    let resolver = PathResolver::with_config(Arc::new(schema), &config);
    MappingRegistry::load(&config, &resolver, None).unwrap()
}

fn groups_of(registry: &MappingRegistry, type_id: &str, field: &str) -> Vec<String> {
    registry
        .table(type_id)
        .and_then(|table| table.get(field))
        .map(|entry| entry.groups().iter().cloned().collect())
        .unwrap_or_default()
}

#[test]
fn module_files_load_before_project_files() {
    let registry = load();
    let names: Vec<String> = registry
        .files()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["publisher.yaml", "book.yaml"]);
    assert_eq!(registry.mapped_types(), &[BOOK.to_string()]);
}

#[test]
fn plain_fields_get_the_base_tag() {
    let registry = load();
    let table = registry.table(BOOK).unwrap();

    for field in ["title", "isbn", "author", "publisher"] {
        assert!(
            table.get(field).unwrap().groups().contains(BASE),
            "{} should carry the base tag",
            field
        );
    }
    assert!(table.all_groups().contains(BASE));
}

#[test]
fn trees_from_several_files_are_merged() {
    let registry = load();
    let table = registry.table(BOOK).unwrap();

    // publisher.name comes from the module file, title from the project
    assert!(table.get("publisher").is_some());
    assert!(table.get("title").is_some());
    assert_eq!(
        groups_of(&registry, "App\\Entity\\Publisher", "name"),
        vec![BASE.to_string()]
    );
}

#[test]
fn nested_fields_are_tagged_on_their_own_type() {
    let registry = load();

    assert_eq!(
        groups_of(&registry, "App\\Entity\\Person", "firstName"),
        vec![BASE.to_string()]
    );
    assert_eq!(
        groups_of(&registry, "App\\Entity\\Person", "address"),
        vec![BASE.to_string()]
    );
    assert_eq!(
        groups_of(&registry, "App\\Entity\\Address", "city"),
        vec![BASE.to_string()]
    );
    // nested types hold entries but never catch-all tags
    assert!(registry
        .table("App\\Entity\\Person")
        .unwrap()
        .all_groups()
        .is_empty());
}

#[test]
fn security_conditions_propagate_to_children() {
    let registry = load();
    let guarded = format!("{}:is_granted('ROLE_USER')", BASE);

    assert_eq!(groups_of(&registry, BOOK, "reviews"), vec![guarded.clone()]);
    assert_eq!(
        groups_of(&registry, "App\\Entity\\Review", "body"),
        vec![guarded.clone()]
    );
    assert!(registry.table(BOOK).unwrap().all_groups().contains(&guarded));
}

#[test]
fn security_on_scalar_fields_tags_only_the_field() {
    let registry = load();

    assert_eq!(
        groups_of(&registry, BOOK, "price"),
        vec![
            format!("{}:is_granted('ROLE_ADMIN')", BASE),
            "App\\Entity\\Book:item.denormalization.patch".to_string(),
        ]
    );
    assert_eq!(
        groups_of(&registry, BOOK, "draftNotes"),
        vec![format!("{}:object.isPublished() == false", BASE)]
    );
}

#[test]
fn max_depth_is_recorded_exactly() {
    let registry = load();
    let table = registry.table(BOOK).unwrap();

    assert_eq!(table.get("price").unwrap().max_depth(), Some(2));
    assert_eq!(table.get("title").unwrap().max_depth(), None);
}

#[test]
fn empty_group_is_rejected() {
    let err = MappingDefinition::from_yaml_str(
        "App\\Entity\\Book:\n  item.normalization.get: {}\n",
        "inline",
    )
    .unwrap_err();

    match err {
        MappingError::EmptyGroup { type_id, group, .. } => {
            assert_eq!(type_id, BOOK);
            assert_eq!(group, "item.normalization.get");
        }
        other => panic!("expected EmptyGroup, got {:?}", other),
    }
}

#[test]
fn broken_file_fails_the_whole_load() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("config/serializer-groups");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("a.yaml"), "Entity:\n  item.normalization.get:\n    name: ~\n")
        .unwrap();
    std::fs::write(dir.join("b.yaml"), "Entity:\n  item.normalization.get: [name]\n").unwrap();

    let config = FieldGateConfig {
        project_dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let resolver = PathResolver::new(Arc::new(SchemaRegistry::new()));

    let err = MappingRegistry::load(&config, &resolver, None).unwrap_err();
    assert!(matches!(err, MappingError::Malformed { .. }), "{:?}", err);
}

#[test]
fn more_files_never_remove_tags() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("config/serializer-groups");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("a.yaml"),
        "Entity:\n  item.normalization.get:\n    name: ~\n",
    )
    .unwrap();

    let config = FieldGateConfig {
        project_dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let resolver = PathResolver::new(Arc::new(SchemaRegistry::new()));
    let subset = MappingRegistry::load(&config, &resolver, None).unwrap();

    std::fs::write(
        dir.join("b.yaml"),
        "Entity:\n  item.normalization.get:\n    name:\n      _serializedName: label\n    email: ~\n  collection.normalization.get:\n    name: ~\n",
    )
    .unwrap();
    let superset = MappingRegistry::load(&config, &resolver, None).unwrap();

    let before = subset.table("Entity").unwrap();
    let after = superset.table("Entity").unwrap();
    for entry in before.attributes() {
        let grown = after.get(entry.name()).unwrap();
        assert!(entry.groups().iter().all(|g| grown.groups().contains(g)));
    }
    assert!(before.all_groups().iter().all(|g| after.all_groups().contains(g)));
    assert_eq!(after.get("name").unwrap().serialized_name(), Some("label"));
    assert_eq!(after.get("name").unwrap().groups().len(), 2);
}
