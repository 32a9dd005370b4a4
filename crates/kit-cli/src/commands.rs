//! CLI command implementations.

use anyhow::{bail, Context, Result};
use kit_git::clone::{self, CloneOptions, CloneOutcome};
use kit_git::HttpTransport;
use kit_storage::tree::{self, TreeEntry};
use kit_storage::{
    Commit, GitObject, LooseObjectStore, ObjectId, ObjectStore, ObjectType, RefStore, RepoConfig,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Directory never included in written trees.
const GIT_DIR: &str = ".git";

/// Loads repository settings, then applies a `-C` override.
pub fn load_config(file: Option<&Path>, root: Option<PathBuf>) -> Result<RepoConfig> {
    let mut config = match file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_yaml::from_str(&text)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => RepoConfig::default(),
    };
    if let Some(root) = root {
        config.root = root;
    }
    Ok(config)
}

fn open_store(config: &RepoConfig) -> Result<LooseObjectStore> {
    LooseObjectStore::open(config).context("failed to open object store")
}

fn parse_id(hex: &str) -> Result<ObjectId> {
    ObjectId::from_hex(hex).with_context(|| format!("not a valid object name: {hex}"))
}

/// Create an empty repository.
pub fn init(config: &RepoConfig) -> Result<()> {
    LooseObjectStore::init(config).context("failed to initialize repository")?;
    println!(
        "Initialized empty kit repository in {}",
        config.git_dir().display()
    );
    Ok(())
}

/// Hash a file as a blob, writing it if requested.
pub fn hash_object(config: &RepoConfig, file: &Path, write: bool) -> Result<()> {
    let content =
        fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    let object = GitObject::blob(content);
    if write {
        open_store(config)?
            .put_object(&object)
            .context("failed to write object")?;
    }
    println!("{}", object.id);
    Ok(())
}

/// What `cat-file` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatMode {
    Pretty,
    Type,
    Size,
    Exists,
}

/// Show an object. Returns `false` only for a failed existence check.
pub fn cat_file(config: &RepoConfig, object: &str, mode: CatMode) -> Result<bool> {
    let id = parse_id(object)?;
    let store = open_store(config)?;
    if mode == CatMode::Exists {
        return Ok(store.exists(&id));
    }

    let object = store
        .get(&id)
        .with_context(|| format!("failed to read object {id}"))?;
    let mut out = std::io::stdout().lock();
    match mode {
        CatMode::Type => writeln!(out, "{}", object.object_type)?,
        CatMode::Size => writeln!(out, "{}", object.size())?,
        CatMode::Pretty if object.object_type == ObjectType::Tree => {
            for entry in tree::decode(&object.data)? {
                writeln!(out, "{}", format_entry(&entry))?;
            }
        }
        CatMode::Pretty | CatMode::Exists => out.write_all(&object.data)?,
    }
    Ok(true)
}

fn format_entry(entry: &TreeEntry) -> String {
    format!(
        "{} {} {}\t{}",
        entry.display_mode(),
        entry.object_type(),
        entry.hash,
        entry.name
    )
}

/// List a tree, or the root tree of a commit.
pub fn ls_tree(config: &RepoConfig, object: &str, name_only: bool) -> Result<()> {
    let store = open_store(config)?;
    let mut object = store.get(&parse_id(object)?)?;
    if object.object_type == ObjectType::Commit {
        let commit = Commit::parse(&object.data)?;
        object = store.get(&commit.tree)?;
    }
    if object.object_type != ObjectType::Tree {
        bail!("not a tree object: {}", object.id);
    }

    let mut out = std::io::stdout().lock();
    for entry in tree::decode(&object.data)? {
        if name_only {
            writeln!(out, "{}", entry.name)?;
        } else {
            writeln!(out, "{}", format_entry(&entry))?;
        }
    }
    Ok(())
}

/// Snapshot the working directory into tree objects.
pub fn write_tree(config: &RepoConfig) -> Result<()> {
    let store = open_store(config)?;
    match write_dir(&store, config.root())? {
        Some(id) => println!("{id}"),
        None => {
            let empty = store.put_object(&tree::build(Vec::new()))?;
            println!("{empty}");
        }
    }
    Ok(())
}

/// Writes `dir` as a tree; `None` when it holds no files.
fn write_dir(store: &dyn ObjectStore, dir: &Path) -> Result<Option<ObjectId>> {
    let mut entries = Vec::new();
    for item in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let item = item?;
        let name = item.file_name().to_string_lossy().into_owned();
        if name == GIT_DIR {
            continue;
        }
        let path = item.path();
        let file_type = item.file_type()?;

        if file_type.is_dir() {
            if let Some(id) = write_dir(store, &path)? {
                entries.push(TreeEntry::new(tree::MODE_TREE, name, id));
            }
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path)?;
            let id = store.put(ObjectType::Blob, target.to_string_lossy().as_bytes())?;
            entries.push(TreeEntry::new(tree::MODE_SYMLINK, name, id));
        } else {
            let content =
                fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let id = store.put(ObjectType::Blob, &content)?;
            entries.push(TreeEntry::new(file_mode(&item.metadata()?), name, id));
        }
    }

    if entries.is_empty() {
        return Ok(None);
    }
    let tree = tree::build(entries);
    tracing::debug!(dir = %dir.display(), id = %tree.id, "wrote tree");
    Ok(Some(store.put_object(&tree)?))
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> &'static str {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        tree::MODE_EXECUTABLE
    } else {
        tree::MODE_FILE
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> &'static str {
    tree::MODE_FILE
}

/// Create a commit for `tree` with the given parents and message.
pub fn commit_tree(
    config: &RepoConfig,
    tree: &str,
    parents: &[String],
    message: &str,
) -> Result<()> {
    let store = open_store(config)?;
    let tree = parse_id(tree)?;
    if store.get(&tree)?.object_type != ObjectType::Tree {
        bail!("not a tree object: {tree}");
    }
    let parents = parents
        .iter()
        .map(|p| parse_id(p))
        .collect::<Result<Vec<_>>>()?;

    let author = identity("AUTHOR")?;
    let committer = identity("COMMITTER")?;
    let commit = GitObject::commit(&tree, &parents, &author, &committer, message);
    store.put_object(&commit)?;
    println!("{}", commit.id);
    Ok(())
}

/// Builds `"Name <email> <seconds> +0000"` from `GIT_<ROLE>_*` variables.
fn identity(role: &str) -> Result<String> {
    let name = std::env::var(format!("GIT_{role}_NAME")).unwrap_or_else(|_| "kit".to_string());
    let email = std::env::var(format!("GIT_{role}_EMAIL"))
        .unwrap_or_else(|_| "kit@localhost".to_string());
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before 1970")?
        .as_secs();
    Ok(format!("{name} <{email}> {seconds} +0000"))
}

/// Arguments of the `clone` command.
#[derive(Debug)]
pub struct CloneArgs {
    pub url: String,
    pub directory: Option<PathBuf>,
    pub branch: String,
    pub verify: bool,
    pub timeout: u64,
    pub json: bool,
}

/// Clone a repository into a new directory.
///
/// On failure the directory is removed again, or only its `.git` if it
/// already existed.
pub fn clone(config: &RepoConfig, args: CloneArgs) -> Result<()> {
    let directory = match &args.directory {
        Some(dir) => dir.clone(),
        None => PathBuf::from(directory_name(&args.url)?),
    };
    let target = config.root().join(&directory);
    let existed = target.exists();
    if existed && fs::read_dir(&target)?.next().is_some() {
        bail!("destination path '{}' already exists and is not empty", target.display());
    }

    let repo = RepoConfig {
        root: target.clone(),
        ..config.clone()
    };
    let outcome = match clone_into(&repo, &args) {
        Ok(outcome) => outcome,
        Err(err) => {
            let leftover = if existed { repo.git_dir() } else { target };
            if let Err(cleanup) = fs::remove_dir_all(&leftover) {
                tracing::warn!(path = %leftover.display(), error = %cleanup, "cleanup failed");
            }
            return Err(err);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!(
            "{} objects, {} deltas resolved (max chain {}), HEAD at {}",
            outcome.objects_written,
            outcome.stats.deltas_resolved,
            outcome.stats.max_chain_depth,
            outcome.head
        );
    }
    Ok(())
}

fn clone_into(repo: &RepoConfig, args: &CloneArgs) -> Result<CloneOutcome> {
    let store = LooseObjectStore::init(repo).context("failed to initialize repository")?;
    let transport = HttpTransport::new(Duration::from_secs(args.timeout))?;
    let options = CloneOptions {
        url: args.url.clone(),
        branch: args.branch.clone(),
        verify_objects: args.verify,
    };

    eprintln!("Cloning into '{}'...", repo.root().display());
    let outcome = clone::clone_repository(&transport, &store, &options)
        .with_context(|| format!("failed to clone {}", options.url))?;
    clone::update_refs(&RefStore::new(repo), &options.branch, outcome.head)?;
    Ok(outcome)
}

/// Derives a directory name from the last URL path segment.
fn directory_name(url: &str) -> Result<String> {
    let name = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .map(|segment| segment.trim_end_matches(".git"))
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .with_context(|| format!("cannot derive a directory name from {url}"))?;
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> (TempDir, RepoConfig) {
        let dir = TempDir::new().unwrap();
        let config = RepoConfig::new(dir.path());
        init(&config).unwrap();
        (dir, config)
    }

    #[test]
    fn test_directory_name() {
        assert_eq!(directory_name("https://h/user/repo.git").unwrap(), "repo");
        assert_eq!(directory_name("https://h/user/repo/").unwrap(), "repo");
        assert!(directory_name("https://").is_err());
    }

    fn unreachable_clone(directory: &str) -> CloneArgs {
        CloneArgs {
            // Port 1 on loopback refuses connections.
            url: "http://127.0.0.1:1/repo.git".to_string(),
            directory: Some(PathBuf::from(directory)),
            branch: "refs/heads/master".to_string(),
            verify: true,
            timeout: 5,
            json: false,
        }
    }

    #[test]
    fn test_failed_clone_removes_new_directory() {
        let dir = TempDir::new().unwrap();
        let config = RepoConfig::new(dir.path());

        assert!(clone(&config, unreachable_clone("fresh")).is_err());
        assert!(!dir.path().join("fresh").exists());
    }

    #[test]
    fn test_failed_clone_keeps_existing_empty_directory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        let config = RepoConfig::new(dir.path());

        assert!(clone(&config, unreachable_clone("empty")).is_err());
        let target = dir.path().join("empty");
        assert!(target.is_dir());
        assert!(fs::read_dir(&target).unwrap().next().is_none());
    }

    #[test]
    fn test_load_config_with_root_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kit.yaml");
        fs::write(&path, "compression: best\nfsync: true\n").unwrap();

        let config = load_config(Some(&path), Some(PathBuf::from("/srv/repo"))).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/repo"));
        assert!(config.fsync);
    }

    #[test]
    fn test_write_tree_skips_git_and_empty_dirs() {
        let (dir, config) = repo();
        fs::write(dir.path().join("b.txt"), "b\n").unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/inner.txt"), "inner\n").unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();

        let store = open_store(&config).unwrap();
        let id = write_dir(&store, dir.path()).unwrap().unwrap();
        let entries = tree::decode(&store.get(&id).unwrap().data).unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b.txt"]);
        assert_eq!(entries[0].mode, tree::MODE_TREE);
        assert_eq!(
            entries[1].hash,
            ObjectId::hash_object(ObjectType::Blob, b"b\n")
        );
    }

    #[test]
    fn test_cat_file_exists() {
        let (_dir, config) = repo();
        let store = open_store(&config).unwrap();
        let id = store.put(ObjectType::Blob, b"present").unwrap();

        assert!(cat_file(&config, &id.to_hex(), CatMode::Exists).unwrap());
        let missing = ObjectId::from_bytes([9; 20]).to_hex();
        assert!(!cat_file(&config, &missing, CatMode::Exists).unwrap());
    }

    #[test]
    fn test_format_entry_pads_tree_mode() {
        let entry = TreeEntry::new(tree::MODE_TREE, "src", ObjectId::from_bytes([1; 20]));
        assert_eq!(
            format_entry(&entry),
            format!("040000 tree {}\tsrc", "01".repeat(20))
        );
    }
}
