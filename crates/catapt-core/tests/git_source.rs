//! Acquisition and pinning against a real local git repository.
//!
//! Skipped when no `git` binary is available.

use std::path::Path;
use std::process::Command;

use catapt_core::source::{AcquireRequest, GitSource, Pinner, SourceAcquirer};
use catapt_core::{Error, ErrorKind};
use catapt_schema::{Protocol, VersioningPolicy};

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=catapt", "-c", "user.email=catapt@example.com"])
        .args(["-c", "init.defaultBranch=main", "-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap().trim().to_string()
}

/// Upstream with `v0.9.0` and `v1.0.0` tags and one commit past the last tag.
fn upstream(root: &Path) -> (String, String) {
    let repo = root.join("upstream");
    std::fs::create_dir_all(repo.join("pkg/bin.all")).unwrap();
    git(&repo, &["init", "-q"]);

    std::fs::write(repo.join("pkg/bin.all/tool"), "0.9\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "first"]);
    git(&repo, &["tag", "v0.9.0"]);

    std::fs::write(repo.join("pkg/bin.all/tool"), "1.0\n").unwrap();
    git(&repo, &["commit", "-q", "-am", "second"]);
    git(&repo, &["tag", "-a", "v1.0.0", "-m", "release"]);
    let tagged = git(&repo, &["rev-parse", "HEAD"]);

    std::fs::write(repo.join("README"), "unreleased\n").unwrap();
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "third"]);

    (format!("file://{}", repo.display()), tagged)
}

fn have_git() -> bool {
    which::which("git").is_ok()
}

#[tokio::test]
async fn semantic_tag_pin_checks_out_the_tagged_tree() {
    if !have_git() {
        eprintln!("git not found, skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let (url, tagged) = upstream(tmp.path());
    let dest = tmp.path().join("work");

    let source = GitSource::new();
    source
        .acquire(&AcquireRequest {
            protocol: Protocol::Git,
            url,
            dest: dest.clone(),
            subpath: "pkg".into(),
            pin: None,
        })
        .await
        .unwrap();

    let pin = source
        .pin(&dest, &VersioningPolicy::SemanticTag)
        .await
        .unwrap();
    assert_eq!(pin.version, "1.0.0");
    assert_eq!(pin.commit, tagged);

    source.checkout(&dest, &pin.commit).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(dest.join("pkg/bin.all/tool")).unwrap(),
        "1.0\n"
    );
    // files from after the tag are not in the checkout
    assert!(!dest.join("README").exists());
}

#[tokio::test]
async fn latest_commit_pin_uses_commit_time() {
    if !have_git() {
        eprintln!("git not found, skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let (url, _) = upstream(tmp.path());
    let dest = tmp.path().join("work");

    let source = GitSource::new();
    source
        .acquire(&AcquireRequest {
            protocol: Protocol::Git,
            url,
            dest: dest.clone(),
            subpath: String::new(),
            pin: None,
        })
        .await
        .unwrap();

    let pin = source
        .pin(
            &dest,
            &VersioningPolicy::LatestCommit {
                branch: "main".into(),
            },
        )
        .await
        .unwrap();
    assert!(pin.version.parse::<u64>().is_ok(), "{}", pin.version);
    assert_eq!(pin.commit.len(), 40);

    let missing = source
        .pin(
            &dest,
            &VersioningPolicy::LatestCommit {
                branch: "nope".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::Pinning);
}

#[tokio::test]
async fn unreachable_remote_is_an_acquisition_error() {
    if !have_git() {
        eprintln!("git not found, skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let err: Error = GitSource::new()
        .acquire(&AcquireRequest {
            protocol: Protocol::Git,
            url: format!("file://{}/missing", tmp.path().display()),
            dest: tmp.path().join("work"),
            subpath: String::new(),
            pin: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Acquisition);
}

#[tokio::test]
async fn option_like_urls_are_treated_as_repositories() {
    if !have_git() {
        eprintln!("git not found, skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("ran");
    let url = format!("--upload-pack=touch {}", marker.display());
    let err = GitSource::new()
        .acquire(&AcquireRequest {
            protocol: Protocol::Git,
            url: url.clone(),
            dest: tmp.path().join("work"),
            subpath: String::new(),
            pin: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Acquisition);
    assert!(err.report().contains(&url), "{}", err.report());
    assert!(!marker.exists());
    assert!(!tmp.path().join("work").exists());
}
