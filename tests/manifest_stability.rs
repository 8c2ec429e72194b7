//! Two runs with identical inputs must produce byte-identical patch
//! manifests: artifact names are content-addressed and collection order is
//! lexicographic, so nothing in the pipeline depends on wall clock or
//! worker interleaving.

use std::path::Path;

use swesmith::adapters::LanguageAdapter;
use swesmith::gen::collect::collect_patches;
use swesmith::gen::procedural;

const REPO_NAME: &str = "o__r.abc1234d";

const SOURCE: &str = "\
def clamp(x, lo, hi):
    if x < lo:
        return lo
    if x > hi:
        return hi
    return x

def total(xs):
    t = 0
    for x in xs:
        if x > 0:
            t += x
    return t
";

fn generate_into(root: &Path) -> std::path::PathBuf {
    let repo = root.join("repo");
    std::fs::create_dir_all(repo.join("src")).unwrap();
    std::fs::write(repo.join("src/math.py"), SOURCE).unwrap();

    let entities = LanguageAdapter::Python
        .entities_in_source(SOURCE, Path::new("src/math.py"))
        .unwrap();
    let bug_gen_dir = root.join("logs/bug_gen").join(REPO_NAME);
    procedural::generate(&repo, &bug_gen_dir, &entities, LanguageAdapter::Python, 50, 24).unwrap();
    bug_gen_dir
}

#[test]
fn identical_inputs_produce_identical_manifests() {
    let run_a = tempfile::tempdir().unwrap();
    let run_b = tempfile::tempdir().unwrap();

    let dir_a = generate_into(run_a.path());
    let dir_b = generate_into(run_b.path());

    let (path_a, entries_a) = collect_patches(&dir_a, REPO_NAME).unwrap();
    let (path_b, entries_b) = collect_patches(&dir_b, REPO_NAME).unwrap();

    assert!(!entries_a.is_empty(), "expected some candidates");
    assert_eq!(entries_a.len(), entries_b.len());
    assert_eq!(
        std::fs::read(path_a).unwrap(),
        std::fs::read(path_b).unwrap(),
        "manifests must be byte-identical across runs"
    );
}

#[test]
fn manifest_entries_are_content_addressed() {
    let run = tempfile::tempdir().unwrap();
    let dir = generate_into(run.path());
    let (_, entries) = collect_patches(&dir, REPO_NAME).unwrap();

    for entry in &entries {
        // instance_id_stub = <repo>.<kind>__<hash> and the hash matches the
        // patch bytes.
        let suffix = entry
            .instance_id_stub
            .strip_prefix(&format!("{REPO_NAME}."))
            .expect("stub carries the repo prefix");
        let (kind, hash) = suffix.rsplit_once("__").expect("stub carries a hash");
        assert_eq!(kind, entry.bug_kind);
        assert_eq!(hash, swesmith::util::short_hash(entry.patch.as_bytes()));
    }
}
