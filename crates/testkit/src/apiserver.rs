//! Stateful fake Kubernetes API server.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use kube::{Client, Config, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value as Json};
use wiremock::{matchers::any, Mock, MockServer, Request, Respond, ResponseTemplate};

/// Collection path of a namespaced kind, e.g. `/api/v1/namespaces/odg/secrets`.
pub fn collection<K: Resource<DynamicType = ()>>(namespace: &str) -> String {
    K::url_path(&(), Some(namespace))
}

#[derive(Default)]
struct State {
    /// collection path -> name -> object
    objects: BTreeMap<String, BTreeMap<String, Json>>,
    revision: u64,
    writes: Vec<String>,
    failures: Vec<(String, String, u16)>,
}

impl State {
    fn bump(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

fn status(code: u16, message: &str) -> ResponseTemplate {
    let reason = match code {
        404 => "NotFound",
        409 => "AlreadyExists",
        410 => "Expired",
        403 => "Forbidden",
        _ => "InternalError",
    };
    ResponseTemplate::new(code).set_body_json(json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code,
    }))
}

/// RFC 7386 JSON merge patch.
fn merge_patch(target: &mut Json, patch: &Json) {
    let Json::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Json::Object(Map::new());
    }
    if let Json::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Json::Null), value);
            }
        }
    }
}

enum Target {
    Version,
    /// `(collection, name)`
    Item(String, String),
    Collection(String),
    /// Cluster-wide list: every collection with this prefix and plural.
    AllNamespaces(String, String),
    Unknown,
}

fn target(path: &str) -> Target {
    if path == "/version" {
        return Target::Version;
    }
    let segs: Vec<&str> = path.trim_matches('/').split('/').collect();
    let base = match segs.first() {
        Some(&"api") => 2,
        Some(&"apis") => 3,
        _ => return Target::Unknown,
    };
    if segs.len() == base + 1 {
        let prefix = format!("/{}", segs[..base].join("/"));
        return Target::AllNamespaces(prefix, segs[base].to_string());
    }
    if segs.get(base) != Some(&"namespaces") {
        return Target::Unknown;
    }
    match segs.len() - base {
        3 => Target::Collection(format!("/{}", segs.join("/"))),
        4 => Target::Item(format!("/{}", segs[..base + 3].join("/")), segs[base + 3].to_string()),
        _ => Target::Unknown,
    }
}

struct Handler(Arc<Mutex<State>>);

impl Respond for Handler {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let method = request.method.as_str().to_string();
        let path = request.url.path().to_string();
        let mut state = lock(&self.0);

        if let Some((_, _, code)) = state.failures.iter().find(|(m, p, _)| *m == method && path.starts_with(p.as_str())) {
            return status(*code, "injected failure");
        }
        if method != "GET" {
            state.writes.push(format!("{method} {path}"));
        }

        match (method.as_str(), target(&path)) {
            ("GET", Target::Version) => ResponseTemplate::new(200).set_body_json(json!({
                "major": "1", "minor": "29", "gitVersion": "v1.29.0", "gitCommit": "fake",
                "gitTreeState": "clean", "buildDate": "2024-01-01T00:00:00Z", "goVersion": "go1.21",
                "compiler": "gc", "platform": "linux/amd64",
            })),
            ("GET", Target::Item(coll, name)) => match state.objects.get(&coll).and_then(|c| c.get(&name)) {
                Some(obj) => ResponseTemplate::new(200).set_body_json(obj),
                None => status(404, &format!("{name} not found")),
            },
            ("GET", Target::Collection(coll)) => {
                let items: Vec<Json> = state.objects.get(&coll).map(|c| c.values().cloned().collect()).unwrap_or_default();
                list(&state, items)
            }
            ("GET", Target::AllNamespaces(prefix, plural)) => {
                let suffix = format!("/{plural}");
                let items: Vec<Json> = state
                    .objects
                    .iter()
                    .filter(|(coll, _)| coll.starts_with(&prefix) && coll.ends_with(&suffix))
                    .flat_map(|(_, objs)| objs.values().cloned())
                    .collect();
                list(&state, items)
            }
            ("POST", Target::Collection(coll)) => {
                let Ok(mut obj) = serde_json::from_slice::<Json>(&request.body) else {
                    return status(400, "undecodable body");
                };
                let Some(name) = obj.pointer("/metadata/name").and_then(Json::as_str).map(str::to_string) else {
                    return status(422, "metadata.name required");
                };
                if state.objects.get(&coll).is_some_and(|c| c.contains_key(&name)) {
                    return status(409, &format!("{name} already exists"));
                }
                let rv = state.bump();
                let namespace = namespace_of(&coll);
                if let Some(meta) = obj.get_mut("metadata").and_then(Json::as_object_mut) {
                    meta.insert("resourceVersion".into(), json!(rv));
                    meta.insert("uid".into(), json!(format!("uid-{rv}")));
                    meta.entry("namespace").or_insert(json!(namespace));
                }
                state.objects.entry(coll).or_default().insert(name, obj.clone());
                ResponseTemplate::new(201).set_body_json(obj)
            }
            ("PATCH", Target::Item(coll, name)) => {
                let Ok(patch) = serde_json::from_slice::<Json>(&request.body) else {
                    return status(400, "undecodable patch");
                };
                let rv = state.bump();
                let Some(obj) = state.objects.get_mut(&coll).and_then(|c| c.get_mut(&name)) else {
                    return status(404, &format!("{name} not found"));
                };
                merge_patch(obj, &patch);
                if let Some(meta) = obj.get_mut("metadata").and_then(Json::as_object_mut) {
                    meta.insert("resourceVersion".into(), json!(rv));
                }
                ResponseTemplate::new(200).set_body_json(obj.clone())
            }
            ("DELETE", Target::Item(coll, name)) => match state.objects.get_mut(&coll).and_then(|c| c.remove(&name)) {
                Some(obj) => ResponseTemplate::new(200).set_body_json(obj),
                None => status(404, &format!("{name} not found")),
            },
            _ => status(405, &format!("{method} {path} not supported by fake")),
        }
    }
}

fn namespace_of(collection: &str) -> String {
    let segs: Vec<&str> = collection.split('/').collect();
    segs.iter()
        .position(|s| *s == "namespaces")
        .and_then(|i| segs.get(i + 1))
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn list(state: &State, items: Vec<Json>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "apiVersion": "v1",
        "kind": "List",
        "metadata": { "resourceVersion": state.revision.to_string() },
        "items": items,
    }))
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory API server. Objects are keyed by collection path and name.
pub struct FakeApiServer {
    server: MockServer,
    state: Arc<Mutex<State>>,
}

impl FakeApiServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(State::default()));
        Mock::given(any()).respond_with(Handler(state.clone())).mount(&server).await;
        Self { server, state }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn client(&self) -> Client {
        let config = Config::new(self.uri().parse().expect("fake server uri"));
        Client::try_from(config).expect("client for fake server")
    }

    /// Kubeconfig document pointing at this server, for code that builds its own client.
    pub fn kubeconfig(&self) -> String {
        format!(
            "apiVersion: v1\nkind: Config\nclusters:\n- name: fake\n  cluster:\n    server: {uri}\ncontexts:\n- name: fake\n  context:\n    cluster: fake\n    user: fake\ncurrent-context: fake\nusers:\n- name: fake\n  user:\n    token: fake\n",
            uri = self.uri()
        )
    }

    /// Store `object` as if it had been created; its namespace comes from its metadata.
    pub fn insert<K>(&self, object: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let ns = object.namespace().unwrap_or_default();
        let name = object.name_any();
        let mut obj = serde_json::to_value(object).expect("serialize seed object");
        if let Some(map) = obj.as_object_mut() {
            map.insert("apiVersion".into(), json!(K::api_version(&())));
            map.insert("kind".into(), json!(K::kind(&())));
        }
        let mut state = lock(&self.state);
        let rv = state.bump();
        if let Some(meta) = obj.get_mut("metadata").and_then(Json::as_object_mut) {
            meta.insert("resourceVersion".into(), json!(rv));
        }
        state.objects.entry(collection::<K>(&ns)).or_default().insert(name, obj);
    }

    pub fn get<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let state = lock(&self.state);
        let obj = state.objects.get(&collection::<K>(namespace))?.get(name)?.clone();
        Some(serde_json::from_value(obj).expect("stored object decodes"))
    }

    pub fn list<K>(&self, namespace: &str) -> Vec<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let state = lock(&self.state);
        state
            .objects
            .get(&collection::<K>(namespace))
            .map(|c| c.values().map(|o| serde_json::from_value(o.clone()).expect("stored object decodes")).collect())
            .unwrap_or_default()
    }

    /// Mutating requests seen so far, as `"METHOD /path"`.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.state).writes.clone()
    }

    /// Answer every `method` request on `K`'s collection in `namespace` (items included) with `code`.
    pub fn fail<K>(&self, method: &str, namespace: &str, code: u16)
    where
        K: Resource<DynamicType = ()>,
    {
        lock(&self.state).failures.push((method.to_string(), collection::<K>(namespace), code));
    }
}
