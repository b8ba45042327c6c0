use proptest::prelude::*;
use tabula::store::{Db, IssueStore};
use tabula::types::{Issue, IssueFilter, IssueUpdate, NewIssue};
use tempfile::TempDir;

const PROJECTS: [&str; 3] = ["apitest", "fcc-project", "other"];
const AUTHORS: [&str; 3] = ["alice", "bob", "YI"];

fn open_temp_db() -> (Db, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Db::open(dir.path().join("tabula.sqlite").to_str().unwrap()).unwrap();
    (db, dir)
}

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof!["[a-zA-Z0-9 _-]{1,40}", "\\PC{1,20}"]
}

fn arb_opt_text() -> impl Strategy<Value = Option<String>> {
    prop_oneof![Just(None), arb_text().prop_map(Some)]
}

/// (project index, author index, closed afterwards)
fn arb_seed() -> impl Strategy<Value = Vec<(usize, usize, bool)>> {
    proptest::collection::vec((0..PROJECTS.len(), 0..AUTHORS.len(), any::<bool>()), 0..20)
}

fn arb_update() -> impl Strategy<Value = IssueUpdate> {
    (
        arb_opt_text(),
        arb_opt_text(),
        arb_opt_text(),
        arb_opt_text(),
        arb_opt_text(),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(
            |(issue_title, issue_text, created_by, assigned_to, status_text, open)| IssueUpdate {
                issue_title,
                issue_text,
                created_by,
                assigned_to,
                status_text,
                open,
            },
        )
}

fn seed(db: &Db, rows: &[(usize, usize, bool)]) -> Vec<Issue> {
    rows.iter()
        .map(|&(project, author, closed)| {
            let issue = db
                .insert(NewIssue {
                    project: PROJECTS[project].into(),
                    issue_title: "issue".into(),
                    issue_text: "property test".into(),
                    created_by: AUTHORS[author].into(),
                    ..Default::default()
                })
                .unwrap();
            if closed {
                db.update_by_id(
                    &issue.id,
                    &IssueUpdate {
                        open: Some(false),
                        ..Default::default()
                    },
                )
                .unwrap()
            } else {
                issue
            }
        })
        .collect()
}

/// In-memory oracle for `find_by_filter`: every supplied field must be equal.
fn matches(filter: &IssueFilter, issue: &Issue) -> bool {
    fn eq<T: PartialEq>(want: &Option<T>, have: &T) -> bool {
        want.as_ref().is_none_or(|w| w == have)
    }
    eq(&filter.id, &issue.id)
        && eq(&filter.issue_title, &issue.issue_title)
        && eq(&filter.issue_text, &issue.issue_text)
        && eq(&filter.created_by, &issue.created_by)
        && eq(&filter.assigned_to, &issue.assigned_to)
        && eq(&filter.status_text, &issue.status_text)
        && eq(&filter.open, &issue.open)
        && eq(&filter.created_on, &issue.created_on)
        && eq(&filter.updated_on, &issue.updated_on)
}

/// In-memory oracle for `update_by_id`, leaving `updated_on` alone.
fn apply(update: &IssueUpdate, issue: &mut Issue) {
    if let Some(v) = &update.issue_title {
        issue.issue_title = v.clone();
    }
    if let Some(v) = &update.issue_text {
        issue.issue_text = v.clone();
    }
    if let Some(v) = &update.created_by {
        issue.created_by = v.clone();
    }
    if let Some(v) = &update.assigned_to {
        issue.assigned_to = v.clone();
    }
    if let Some(v) = &update.status_text {
        issue.status_text = v.clone();
    }
    if let Some(v) = update.open {
        issue.open = v;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn listing_returns_exactly_the_project(rows in arb_seed(), project in 0..PROJECTS.len()) {
        let (db, _dir) = open_temp_db();
        let all = seed(&db, &rows);

        let expected: Vec<Issue> = all
            .into_iter()
            .filter(|i| i.project == PROJECTS[project])
            .collect();
        let listed = db.find_by_filter(PROJECTS[project], &IssueFilter::default()).unwrap();

        prop_assert_eq!(listed, expected);
    }

    #[test]
    fn filters_return_only_matching_issues(
        rows in arb_seed(),
        project in 0..PROJECTS.len(),
        author in proptest::option::of(0..AUTHORS.len()),
        open in proptest::option::of(any::<bool>()),
    ) {
        let (db, _dir) = open_temp_db();
        let all = seed(&db, &rows);

        let filter = IssueFilter {
            created_by: author.map(|a| AUTHORS[a].to_string()),
            open,
            ..Default::default()
        };

        let expected: Vec<Issue> = all
            .into_iter()
            .filter(|i| i.project == PROJECTS[project] && matches(&filter, i))
            .collect();
        let listed = db.find_by_filter(PROJECTS[project], &filter).unwrap();

        for issue in &listed {
            prop_assert!(matches(&filter, issue));
            prop_assert_eq!(&issue.project, PROJECTS[project]);
        }
        prop_assert_eq!(listed, expected);
    }

    #[test]
    fn update_touches_only_supplied_fields(update in arb_update()) {
        let (db, _dir) = open_temp_db();
        let issue = seed(&db, &[(0, 0, false)]).remove(0);
        let bystander = seed(&db, &[(0, 1, false)]).remove(0);

        let updated = db.update_by_id(&issue.id, &update).unwrap();

        let mut expected = issue.clone();
        apply(&update, &mut expected);
        expected.updated_on = updated.updated_on;

        prop_assert_eq!(&updated, &expected);
        prop_assert_eq!(&updated.project, &issue.project);
        prop_assert!(updated.updated_on >= issue.updated_on);
        prop_assert!(updated.created_on <= updated.updated_on);

        let stored = db
            .find_by_filter(&issue.project, &IssueFilter::default())
            .unwrap();
        prop_assert_eq!(stored, vec![updated, bystander]);
    }
}
