//! In-memory GitHub for pipeline tests.
//!
//! Models just enough of the Git Data and pulls APIs: content-addressed
//! blobs, flattened trees, commits with parents, branch refs with
//! fast-forward checks, compare by ancestry, and open pull requests.
//! Failures can be injected per operation (and optionally per repository).

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sha1::{Digest, Sha1};

use crate::export::git_blob_sha;
use crate::github::{
    CommitInfo, CompareStatus, Comparison, GitHubApi, GitHubError, NewPullRequest, NewTreeEntry,
    PullRequest, RepositoryInfo, Result, Tree, TreeEntry, TreeEntryKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListRepos,
    GetRef,
    GetCommit,
    GetTree,
    Compare,
    CreateBlob,
    CreateTree,
    CreateCommit,
    CreateRef,
    UpdateRef,
    FindPull,
    CreatePull,
}

impl Op {
    fn is_write(self) -> bool {
        matches!(
            self,
            Op::CreateBlob
                | Op::CreateTree
                | Op::CreateCommit
                | Op::CreateRef
                | Op::UpdateRef
                | Op::CreatePull
        )
    }
}

/// When an injected failure fires relative to the real operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Fail without performing the operation.
    Before,
    /// Perform the operation, then report failure (a lost response).
    After,
}

type ErrorFactory = Box<dyn Fn() -> GitHubError + Send + Sync>;
type Hook = Box<dyn FnOnce(&FakeGitHub) + Send>;

struct Injection {
    repo: Option<String>,
    mode: FailMode,
    remaining: usize,
    error: ErrorFactory,
}

#[derive(Default)]
struct FakeRepo {
    default_branch: String,
    refs: BTreeMap<String, String>,
    authorized: bool,
    truncated: bool,
}

struct FakeCommit {
    tree: String,
    message: String,
    parents: Vec<String>,
}

#[derive(Default)]
struct State {
    repos: BTreeMap<String, FakeRepo>,
    blobs: HashMap<String, Vec<u8>>,
    trees: HashMap<String, BTreeMap<String, String>>,
    commits: HashMap<String, FakeCommit>,
    pulls: BTreeMap<String, Vec<PullRequest>>,
    next_pull: u64,
    clock: u64,
    calls: HashMap<Op, usize>,
    injections: HashMap<Op, VecDeque<Injection>>,
    hooks: HashMap<Op, VecDeque<Hook>>,
}

/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct FakeGitHub {
    state: Arc<Mutex<State>>,
}

fn key(owner: &str, name: &str) -> String {
    format!("{owner}/{name}").to_ascii_lowercase()
}

fn sha1_hex(input: &str) -> String {
    hex::encode(Sha1::digest(input.as_bytes()))
}

fn unprocessable(message: &str) -> GitHubError {
    GitHubError::Unprocessable {
        status: 422,
        message: message.to_string(),
    }
}

impl State {
    fn repo(&self, owner: &str, name: &str) -> Result<&FakeRepo> {
        self.repos
            .get(&key(owner, name))
            .ok_or_else(|| GitHubError::NotFound(format!("{owner}/{name}")))
    }

    fn repo_mut(&mut self, owner: &str, name: &str) -> Result<&mut FakeRepo> {
        self.repos
            .get_mut(&key(owner, name))
            .ok_or_else(|| GitHubError::NotFound(format!("{owner}/{name}")))
    }

    fn put_tree(&mut self, entries: BTreeMap<String, String>) -> String {
        let listing: String = entries.iter().map(|(p, s)| format!("{p} {s}\n")).collect();
        let sha = sha1_hex(&format!("tree\n{listing}"));
        self.trees.insert(sha.clone(), entries);
        sha
    }

    fn put_commit(&mut self, tree: &str, message: &str, parents: Vec<String>) -> String {
        self.clock += 1;
        let sha = sha1_hex(&format!(
            "commit {tree}\n{}\n{}\n{message}",
            parents.join(" "),
            self.clock
        ));
        self.commits.insert(
            sha.clone(),
            FakeCommit {
                tree: tree.to_string(),
                message: message.to_string(),
                parents,
            },
        );
        sha
    }

    fn ancestors(&self, sha: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![sha.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&current) {
                stack.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    fn commit_info(&self, sha: &str) -> Result<CommitInfo> {
        let commit = self
            .commits
            .get(sha)
            .ok_or_else(|| GitHubError::NotFound(format!("commit {sha}")))?;
        Ok(CommitInfo {
            sha: sha.to_string(),
            tree_sha: commit.tree.clone(),
            message: commit.message.clone(),
            parents: commit.parents.clone(),
        })
    }

    fn files_at(&self, commit_sha: &str) -> BTreeMap<String, String> {
        self.commits
            .get(commit_sha)
            .and_then(|c| self.trees.get(&c.tree))
            .cloned()
            .unwrap_or_default()
    }
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an authorized repository with one commit holding `files`.
    pub fn add_repo(&self, owner: &str, name: &str, default_branch: &str, files: &[(&str, &str)]) -> String {
        let mut state = self.lock();
        let mut entries = BTreeMap::new();
        for (path, content) in files {
            let sha = git_blob_sha(content.as_bytes());
            state.blobs.insert(sha.clone(), content.as_bytes().to_vec());
            entries.insert((*path).to_string(), sha);
        }
        let tree = state.put_tree(entries);
        let commit = state.put_commit(&tree, "Initial commit", Vec::new());
        state.repos.insert(
            key(owner, name),
            FakeRepo {
                default_branch: default_branch.to_string(),
                refs: BTreeMap::from([(default_branch.to_string(), commit.clone())]),
                authorized: true,
                truncated: false,
            },
        );
        commit
    }

    /// Commit changes (`None` deletes) on top of `branch`, creating it from the
    /// default branch if needed. Returns the new commit sha.
    pub fn push_commit(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        changes: &[(&str, Option<&str>)],
        message: &str,
    ) -> String {
        let mut state = self.lock();
        let repo = state.repo(owner, name).expect("repo exists");
        let parent = repo
            .refs
            .get(branch)
            .or_else(|| repo.refs.get(&repo.default_branch))
            .cloned()
            .expect("branch exists");

        let mut entries = state.files_at(&parent);
        for (path, content) in changes {
            match content {
                Some(content) => {
                    let sha = git_blob_sha(content.as_bytes());
                    state.blobs.insert(sha.clone(), content.as_bytes().to_vec());
                    entries.insert((*path).to_string(), sha);
                }
                None => {
                    entries.remove(*path);
                }
            }
        }
        let tree = state.put_tree(entries);
        let commit = state.put_commit(&tree, message, vec![parent]);
        state
            .repo_mut(owner, name)
            .expect("repo exists")
            .refs
            .insert(branch.to_string(), commit.clone());
        commit
    }

    pub fn set_authorized(&self, owner: &str, name: &str, authorized: bool) {
        self.lock().repo_mut(owner, name).expect("repo exists").authorized = authorized;
    }

    pub fn set_truncated(&self, owner: &str, name: &str, truncated: bool) {
        self.lock().repo_mut(owner, name).expect("repo exists").truncated = truncated;
    }

    pub fn ref_of(&self, owner: &str, name: &str, branch: &str) -> Option<String> {
        let state = self.lock();
        state.repo(owner, name).ok()?.refs.get(branch).cloned()
    }

    pub fn branches(&self, owner: &str, name: &str) -> Vec<String> {
        let state = self.lock();
        state
            .repo(owner, name)
            .map(|r| r.refs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// File contents at the tip of `branch`.
    pub fn files_on(&self, owner: &str, name: &str, branch: &str) -> BTreeMap<String, String> {
        let state = self.lock();
        let Some(head) = state.repo(owner, name).ok().and_then(|r| r.refs.get(branch)) else {
            return BTreeMap::new();
        };
        state
            .files_at(head)
            .into_iter()
            .map(|(path, sha)| {
                let content = state.blobs.get(&sha).cloned().unwrap_or_default();
                (path, String::from_utf8_lossy(&content).into_owned())
            })
            .collect()
    }

    pub fn commit_message(&self, sha: &str) -> Option<String> {
        self.lock().commits.get(sha).map(|c| c.message.clone())
    }

    pub fn commit_parents(&self, sha: &str) -> Vec<String> {
        self.lock()
            .commits
            .get(sha)
            .map(|c| c.parents.clone())
            .unwrap_or_default()
    }

    pub fn open_pulls(&self, owner: &str, name: &str) -> Vec<PullRequest> {
        self.lock()
            .pulls
            .get(&key(owner, name))
            .cloned()
            .unwrap_or_default()
    }

    /// Simulate a reviewer merging (closing) every open pull request.
    pub fn close_pulls(&self, owner: &str, name: &str) {
        self.lock().pulls.remove(&key(owner, name));
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of write operations performed (or attempted) so far.
    pub fn writes(&self) -> usize {
        let state = self.lock();
        state
            .calls
            .iter()
            .filter(|(op, _)| op.is_write())
            .map(|(_, n)| n)
            .sum()
    }

    /// Make the next `times` calls of `op` (on `repo`, or any repo) fail.
    pub fn fail(
        &self,
        op: Op,
        repo: Option<&str>,
        mode: FailMode,
        times: usize,
        error: impl Fn() -> GitHubError + Send + Sync + 'static,
    ) {
        self.lock().injections.entry(op).or_default().push_back(Injection {
            repo: repo.map(str::to_ascii_lowercase),
            mode,
            remaining: times,
            error: Box::new(error),
        });
    }

    /// Run `hook` once, right before the next call of `op` is served.
    pub fn before_next(&self, op: Op, hook: impl FnOnce(&FakeGitHub) + Send + 'static) {
        self.lock().hooks.entry(op).or_default().push_back(Box::new(hook));
    }

    /// Count the call, run hooks, and pick an injected failure if one applies.
    fn enter(&self, op: Op, repo: Option<String>) -> Option<(FailMode, GitHubError)> {
        let hook = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            state.hooks.get_mut(&op).and_then(VecDeque::pop_front)
        };
        if let Some(hook) = hook {
            hook(self);
        }

        let mut state = self.lock();
        let queue = state.injections.get_mut(&op)?;
        let index = queue
            .iter()
            .position(|i| i.repo.is_none() || i.repo == repo)?;
        let injection = &mut queue[index];
        injection.remaining -= 1;
        let fired = (injection.mode, (injection.error)());
        if injection.remaining == 0 {
            queue.remove(index);
        }
        Some(fired)
    }

    /// Run `op` under failure injection.
    fn serve<T>(
        &self,
        op: Op,
        owner: &str,
        name: &str,
        action: impl FnOnce(&mut State) -> Result<T>,
    ) -> Result<T> {
        match self.enter(op, Some(key(owner, name))) {
            Some((FailMode::Before, err)) => Err(err),
            Some((FailMode::After, err)) => {
                let _ = action(&mut self.lock());
                Err(err)
            }
            None => action(&mut self.lock()),
        }
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn list_installation_repositories(&self) -> Result<Vec<RepositoryInfo>> {
        if let Some((_, err)) = self.enter(Op::ListRepos, None) {
            return Err(err);
        }
        let state = self.lock();
        Ok(state
            .repos
            .iter()
            .filter(|(_, r)| r.authorized)
            .map(|(full_name, r)| {
                let (owner, name) = full_name.split_once('/').unwrap_or(("", full_name));
                RepositoryInfo {
                    owner: owner.to_string(),
                    name: name.to_string(),
                    default_branch: r.default_branch.clone(),
                }
            })
            .collect())
    }

    async fn get_branch_head(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<String>> {
        self.serve(Op::GetRef, owner, repo, |s| {
            Ok(s.repo(owner, repo)?.refs.get(branch).cloned())
        })
    }

    async fn get_commit(&self, owner: &str, repo: &str, sha: &str) -> Result<CommitInfo> {
        self.serve(Op::GetCommit, owner, repo, |s| s.commit_info(sha))
    }

    async fn get_tree(&self, owner: &str, repo: &str, tree_sha: &str) -> Result<Tree> {
        self.serve(Op::GetTree, owner, repo, |s| {
            let truncated = s.repo(owner, repo)?.truncated;
            let entries = s
                .trees
                .get(tree_sha)
                .ok_or_else(|| GitHubError::NotFound(format!("tree {tree_sha}")))?;
            Ok(Tree {
                sha: tree_sha.to_string(),
                entries: entries
                    .iter()
                    .map(|(path, sha)| TreeEntry {
                        path: path.clone(),
                        mode: "100644".to_string(),
                        kind: TreeEntryKind::Blob,
                        sha: sha.clone(),
                    })
                    .collect(),
                truncated,
            })
        })
    }

    async fn compare(&self, owner: &str, repo: &str, base: &str, head: &str) -> Result<Comparison> {
        self.serve(Op::Compare, owner, repo, |s| {
            s.commit_info(base)?;
            s.commit_info(head)?;
            let base_set = s.ancestors(base);
            let head_set = s.ancestors(head);
            let ahead: Vec<&String> = head_set.difference(&base_set).collect();
            let behind = base_set.difference(&head_set).count();

            let status = match (ahead.len(), behind) {
                (0, 0) => CompareStatus::Identical,
                (_, 0) => CompareStatus::Ahead,
                (0, _) => CompareStatus::Behind,
                _ => CompareStatus::Diverged,
            };
            let commits = ahead
                .iter()
                .map(|sha| s.commit_info(sha))
                .collect::<Result<Vec<_>>>()?;

            Ok(Comparison {
                status,
                ahead_by: u32::try_from(commits.len()).unwrap_or(u32::MAX),
                behind_by: u32::try_from(behind).unwrap_or(u32::MAX),
                commits,
            })
        })
    }

    async fn create_blob(&self, owner: &str, repo: &str, content: &[u8]) -> Result<String> {
        self.serve(Op::CreateBlob, owner, repo, |s| {
            s.repo(owner, repo)?;
            let sha = git_blob_sha(content);
            s.blobs.insert(sha.clone(), content.to_vec());
            Ok(sha)
        })
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[NewTreeEntry],
    ) -> Result<String> {
        self.serve(Op::CreateTree, owner, repo, |s| {
            let mut files = s
                .trees
                .get(base_tree)
                .cloned()
                .ok_or_else(|| unprocessable("base_tree is not a valid tree"))?;
            for entry in entries {
                match &entry.sha {
                    Some(sha) if s.blobs.contains_key(sha) => {
                        files.insert(entry.path.clone(), sha.clone());
                    }
                    Some(_) => return Err(unprocessable("tree.sha is not a valid blob")),
                    None => {
                        files.remove(&entry.path);
                    }
                }
            }
            Ok(s.put_tree(files))
        })
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parents: &[String],
    ) -> Result<CommitInfo> {
        self.serve(Op::CreateCommit, owner, repo, |s| {
            if !s.trees.contains_key(tree_sha) || parents.iter().any(|p| !s.commits.contains_key(p)) {
                return Err(unprocessable("tree or parent sha is invalid"));
            }
            let sha = s.put_commit(tree_sha, message, parents.to_vec());
            s.commit_info(&sha)
        })
    }

    async fn create_branch(&self, owner: &str, repo: &str, branch: &str, sha: &str) -> Result<()> {
        self.serve(Op::CreateRef, owner, repo, |s| {
            if !s.commits.contains_key(sha) {
                return Err(unprocessable("Object does not exist"));
            }
            let fake = s.repo_mut(owner, repo)?;
            if fake.refs.contains_key(branch) {
                return Err(unprocessable("Reference already exists"));
            }
            fake.refs.insert(branch.to_string(), sha.to_string());
            Ok(())
        })
    }

    async fn update_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
        force: bool,
    ) -> Result<()> {
        self.serve(Op::UpdateRef, owner, repo, |s| {
            if !s.commits.contains_key(sha) {
                return Err(unprocessable("Object does not exist"));
            }
            let current = s
                .repo(owner, repo)?
                .refs
                .get(branch)
                .cloned()
                .ok_or_else(|| unprocessable("Reference does not exist"))?;
            if !force && !s.ancestors(sha).contains(&current) {
                return Err(unprocessable("Update is not a fast forward"));
            }
            s.repo_mut(owner, repo)?
                .refs
                .insert(branch.to_string(), sha.to_string());
            Ok(())
        })
    }

    async fn find_open_pull(
        &self,
        owner: &str,
        repo: &str,
        head_branch: &str,
        base: &str,
    ) -> Result<Option<PullRequest>> {
        self.serve(Op::FindPull, owner, repo, |s| {
            s.repo(owner, repo)?;
            Ok(s.pulls.get(&key(owner, repo)).and_then(|pulls| {
                pulls
                    .iter()
                    .find(|p| p.head_branch == head_branch && p.base_branch == base)
                    .cloned()
            }))
        })
    }

    async fn create_pull(&self, owner: &str, repo: &str, pull: &NewPullRequest) -> Result<PullRequest> {
        self.serve(Op::CreatePull, owner, repo, |s| {
            let fake = s.repo(owner, repo)?;
            if !fake.refs.contains_key(&pull.head) {
                return Err(unprocessable("head does not exist"));
            }
            let pulls = s.pulls.entry(key(owner, repo)).or_default();
            if pulls
                .iter()
                .any(|p| p.head_branch == pull.head && p.base_branch == pull.base)
            {
                return Err(unprocessable("A pull request already exists"));
            }
            s.next_pull += 1;
            let number = s.next_pull;
            let created = PullRequest {
                number,
                url: format!("https://github.test/{owner}/{repo}/pull/{number}"),
                head_branch: pull.head.clone(),
                base_branch: pull.base.clone(),
            };
            s.pulls
                .entry(key(owner, repo))
                .or_default()
                .push(created.clone());
            Ok(created)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn compare_tracks_ancestry() {
        let fake = FakeGitHub::new();
        let base = fake.add_repo("o", "r", "main", &[("a", "1")]);
        let feature = fake.push_commit("o", "r", "feature", &[("b", Some("2"))], "feature work");

        let cmp = fake.compare("o", "r", &base, &feature).await.expect("compare");
        assert_eq!(cmp.status, CompareStatus::Ahead);
        assert_eq!(cmp.commits.len(), 1);
        assert_eq!(cmp.commits[0].message, "feature work");

        let main = fake.push_commit("o", "r", "main", &[("c", Some("3"))], "main work");
        let cmp = fake.compare("o", "r", &main, &feature).await.expect("compare");
        assert_eq!(cmp.status, CompareStatus::Diverged);
        assert_eq!((cmp.ahead_by, cmp.behind_by), (1, 1));
    }

    #[tokio::test]
    async fn update_without_force_requires_fast_forward() {
        let fake = FakeGitHub::new();
        fake.add_repo("o", "r", "main", &[("a", "1")]);
        let side = fake.push_commit("o", "r", "side", &[("a", Some("2"))], "side");
        fake.push_commit("o", "r", "main", &[("a", Some("3"))], "main");

        let err = fake
            .update_branch("o", "r", "main", &side, false)
            .await
            .expect_err("not a fast forward");
        assert!(err.is_unprocessable());
        fake.update_branch("o", "r", "main", &side, true)
            .await
            .expect("forced");
        assert_eq!(fake.ref_of("o", "r", "main"), Some(side));
    }

    #[tokio::test]
    async fn injected_failures_fire_per_repo() {
        let fake = FakeGitHub::new();
        fake.add_repo("o", "a", "main", &[]);
        fake.add_repo("o", "b", "main", &[]);
        fake.fail(Op::GetRef, Some("o/a"), FailMode::Before, 1, || {
            GitHubError::Server {
                status: 500,
                message: "boom".into(),
            }
        });

        assert!(fake.get_branch_head("o", "b", "main").await.is_ok());
        assert!(fake.get_branch_head("o", "a", "main").await.is_err());
        assert!(fake.get_branch_head("o", "a", "main").await.is_ok());
        assert_eq!(fake.calls(Op::GetRef), 3);
    }
}
