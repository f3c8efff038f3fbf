//! Object handles, mutations and queries through the configuration facade

mod common;

use common::assertions::*;
use common::fixtures::*;
use confdb::core::{ErrorKind, ExportFilter, Query};
use confdb::schema::Value;
use serde_json::json;

fn uids(objects: &[confdb::ConfigObject]) -> Vec<String> {
    let mut uids: Vec<String> = objects.iter().map(|o| o.uid().to_string()).collect();
    uids.sort();
    uids
}

#[test]
fn test_create_then_get_returns_same_identity() {
    let (config, _) = configuration();
    let created = config.create_object(DATA_DB, "Application", "web").unwrap();
    let found = config.get_object("Application", "web").unwrap();

    assert_eq!(created, found);
    assert_eq!(found.class_name(), "Application");
    assert_eq!(found.contained_in().unwrap(), DATA_DB);
}

#[test]
fn test_new_objects_carry_defaults() {
    let (config, _) = configuration();
    let web = config.create_object(DATA_DB, "Application", "web").unwrap();

    assert_eq!(web.get("port").unwrap(), Value::U32(8080));
    assert_eq!(web.get("enabled").unwrap(), Value::Bool(true));
    assert_eq!(web.get("name").unwrap(), Value::String(String::new()));
    assert_eq!(web.get("tags").unwrap(), Value::List(Vec::new()));
    assert!(web.get_relationship("uses").unwrap().is_empty());
}

#[test]
fn test_lookup_through_superclass() {
    let (config, _) = configuration();
    config.create_object(DATA_DB, "Application", "web").unwrap();

    let found = config.get_object("Component", "web").unwrap();
    assert_eq!(found.class_name(), "Application");
    assert!(config.is_subclass_of("Application", "Component").unwrap());
    assert!(!config.is_subclass_of("Settings", "Component").unwrap());
}

#[test]
fn test_create_errors() {
    let (config, _) = configuration();
    config.create_object(DATA_DB, "Application", "web").unwrap();

    assert_kind(config.create_object(DATA_DB, "Application", "web"), ErrorKind::AlreadyExists);
    assert_kind(config.create_object(DATA_DB, "Component", "x"), ErrorKind::NotAllowed);
    assert_kind(config.create_object(DATA_DB, "Gadget", "x"), ErrorKind::NotFound);
    assert_kind(config.create_object(DATA_DB, "Application", ""), ErrorKind::NotValid);
}

#[test]
fn test_attribute_values_are_checked() {
    let (config, _) = configuration();
    let web = config.create_object(DATA_DB, "Application", "web").unwrap();

    web.set("port", 443).unwrap();
    assert_eq!(web.get("port").unwrap(), Value::U32(443));

    assert_kind(web.set("port", 70_000u32), ErrorKind::NotValid);
    assert_kind(web.set("port", "eighty"), ErrorKind::NotValid);
    assert_kind(web.set("tags", "single"), ErrorKind::NotValid);
    assert_kind(web.set("colour", "red"), ErrorKind::NotFound);

    web.set("tags", vec![Value::from("edge"), Value::from("public")]).unwrap();
    assert_eq!(
        web.get("tags").unwrap(),
        Value::List(vec![Value::from("edge"), Value::from("public")])
    );
    assert_eq!(web.get("port").unwrap(), Value::U32(443));
}

#[test]
fn test_relationships_and_back_references() {
    let (config, _) = configuration();
    let web = config.create_object(DATA_DB, "Application", "web").unwrap();
    let tls = config.create_object(DATA_DB, "Library", "tls").unwrap();
    let json = config.create_object(DATA_DB, "Library", "json").unwrap();
    let settings = config.create_object(DATA_DB, "Settings", "web-settings").unwrap();

    web.set_relationship("uses", &[&tls, &json]).unwrap();
    web.set_relationship("settings", &[&settings]).unwrap();

    assert_eq!(uids(&web.get_relationship("uses").unwrap()), vec!["json", "tls"]);
    assert_eq!(uids(&tls.referenced_by("uses", false).unwrap()), vec!["web"]);
    assert_eq!(uids(&settings.composite_parents().unwrap()), vec!["web"]);
    assert!(tls.composite_parents().unwrap().is_empty());

    assert_kind(web.set_relationship("uses", &[&settings]), ErrorKind::NotValid);
    assert_kind(web.set_relationship("settings", &[&settings, &settings]), ErrorKind::NotValid);
}

#[test]
fn test_destroy_missing_object_is_not_found() {
    let (config, _) = configuration();
    assert_kind(config.destroy("Application", "ghost"), ErrorKind::NotFound);
}

#[test]
fn test_destroy_then_get_is_not_found() {
    let (config, _) = configuration();
    let web = config.create_object(DATA_DB, "Application", "web").unwrap();
    config.destroy("Application", "web").unwrap();

    assert_kind(config.get_object("Application", "web"), ErrorKind::NotFound);
    assert!(!web.is_valid());
    assert_kind(web.get("port"), ErrorKind::NotValid);
}

#[test]
fn test_destroy_cascades_to_aggregated_objects() {
    let (config, _) = configuration();
    let web = config.create_object(DATA_DB, "Application", "web").unwrap();
    let settings = config.create_object(DATA_DB, "Settings", "web-settings").unwrap();
    let tls = config.create_object(DATA_DB, "Library", "tls").unwrap();
    web.set_relationship("settings", &[&settings]).unwrap();
    web.set_relationship("uses", &[&tls]).unwrap();

    assert_kind(settings.destroy(), ErrorKind::NotAllowed);

    web.destroy().unwrap();
    assert_kind(config.get_object("Settings", "web-settings"), ErrorKind::NotFound);
    assert!(config.get_object("Library", "tls").is_ok());
}

#[test]
fn test_destroying_a_target_unlinks_it() {
    let (config, _) = configuration();
    let web = config.create_object(DATA_DB, "Application", "web").unwrap();
    let tls = config.create_object(DATA_DB, "Library", "tls").unwrap();
    web.set_relationship("uses", &[&tls]).unwrap();

    tls.destroy().unwrap();
    assert!(web.get_relationship("uses").unwrap().is_empty());
}

#[test]
fn test_rename_keeps_references_and_stales_old_handles() {
    let (config, _) = configuration();
    let web = config.create_object(DATA_DB, "Application", "web").unwrap();
    let mut tls = config.create_object(DATA_DB, "Library", "tls").unwrap();
    let old = tls.clone();
    web.set_relationship("uses", &[&tls]).unwrap();

    tls.rename("rustls").unwrap();
    assert_eq!(tls.uid(), "rustls");
    assert_eq!(uids(&web.get_relationship("uses").unwrap()), vec!["rustls"]);
    assert_kind(old.get("version"), ErrorKind::NotValid);
    assert_kind(config.get_object("Library", "tls"), ErrorKind::NotFound);

    config.create_object(DATA_DB, "Library", "json").unwrap();
    assert_kind(tls.rename("json"), ErrorKind::AlreadyExists);
}

#[test]
fn test_handles_go_stale_on_close_and_revalidate_after_reopen() {
    let (config, _) = configuration();
    let mut web = config.create_object(DATA_DB, "Application", "web").unwrap();
    config.commit("add web").unwrap();

    config.close_db().unwrap();
    config.open_db(DATA_DB).unwrap();
    assert_kind(web.get("port"), ErrorKind::NotValid);

    web.revalidate().unwrap();
    assert_eq!(web.get("port").unwrap(), Value::U32(8080));
}

#[test]
fn test_empty_query_returns_class_and_subclasses() {
    let (config, _) = configuration();
    config.create_object(DATA_DB, "Application", "web").unwrap();
    config.create_object(DATA_DB, "Library", "tls").unwrap();
    config.create_object(DATA_DB, "Settings", "s").unwrap();

    let all = config.get_objects("Component", &Query::all()).unwrap();
    assert_eq!(uids(&all), vec!["tls", "web"]);
    let apps = config.get_objects("Application", &Query::all()).unwrap();
    assert_eq!(uids(&apps), vec!["web"]);
    assert_kind(config.get_objects("Gadget", &Query::all()), ErrorKind::NotFound);
}

#[test]
fn test_filter_queries() {
    let (config, _) = configuration();
    for (uid, port) in [("web", 80u32), ("api", 8443), ("admin", 9000)] {
        let app = config.create_object(DATA_DB, "Application", uid).unwrap();
        app.set("port", port).unwrap();
    }
    let tls = config.create_object(DATA_DB, "Library", "tls").unwrap();
    config
        .get_object("Application", "api")
        .unwrap()
        .set_relationship("uses", &[&tls])
        .unwrap();

    let run = |text: &str| uids(&config.get_objects("Application", &config.query(text).unwrap()).unwrap());
    assert_eq!(run("port >= 1024"), vec!["admin", "api"]);
    assert_eq!(run("port < 1024 or uid = 'admin'"), vec!["admin", "web"]);
    assert_eq!(run("not (port = 80)"), vec!["admin", "api"]);
    assert_eq!(run("uses -> 'tls'"), vec!["api"]);

    assert_kind(config.query("port >="), ErrorKind::BadQuery);
    assert_kind(
        config.get_objects("Application", &Query::new("colour = 'red'")),
        ErrorKind::NotFound,
    );
}

#[test]
fn test_path_queries() {
    let (config, _) = configuration();
    let web = config.create_object(DATA_DB, "Application", "web").unwrap();
    let tls = config.create_object(DATA_DB, "Library", "tls").unwrap();
    let settings = config.create_object(DATA_DB, "Settings", "web-settings").unwrap();
    web.set_relationship("uses", &[&tls]).unwrap();
    web.set_relationship("settings", &[&settings]).unwrap();

    let path = |text: &str| uids(&config.get_path(&web, &config.query(text).unwrap()).unwrap());
    assert_eq!(path("uses"), vec!["tls"]);
    assert_eq!(path("*"), vec!["tls", "web-settings"]);
    assert_eq!(path("*@Settings"), vec!["web-settings"]);

    web.destroy().unwrap();
    assert_kind(config.get_path(&web, &Query::new("uses")), ErrorKind::NotValid);
}

#[test]
fn test_export_schema_and_data() {
    let (config, _) = configuration();
    let web = config.create_object(DATA_DB, "Application", "web").unwrap();
    let tls = config.create_object(DATA_DB, "Library", "tls").unwrap();
    web.set("port", 443).unwrap();
    web.set_relationship("uses", &[&tls]).unwrap();

    let schema = config.export_schema(&["Application"], true).unwrap();
    let app = &schema["Application"];
    assert_eq!(app["abstract"], false);
    assert_eq!(app["attributes"]["port"]["type"], "u32");
    assert_eq!(app["attributes"]["port"]["range"], "1..65535");
    assert_eq!(app["relationships"]["uses"]["type"], "Library");
    assert!(schema.get("Library").is_none());

    let data = config.export_data(&ExportFilter::default()).unwrap();
    assert_eq!(data["Application"]["web"]["port"], 443);
    assert_eq!(data["Application"]["web"]["uses"], json!(["tls@Library"]));
    assert_eq!(data["Application"]["web"]["settings"], json!(""));
    assert_eq!(data["Library"]["tls"]["enabled"], true);

    let only_libraries = ExportFilter {
        classes: vec!["Library".to_string()],
        ..Default::default()
    };
    let data = config.export_data(&only_libraries).unwrap();
    assert!(data.get("Application").is_none());
    assert!(data.get("Library").is_some());
}
