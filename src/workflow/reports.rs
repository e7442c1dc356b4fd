//! Facility reports filed by residents and their comment threads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use crate::database::{AccountStore, HouseStore, ProfileStore, ReportStore};
use crate::error::{Result, ServerError};
use crate::model::{Account, Comment, ReportStatus, ReportThread};

/// Reports per page.
pub const PER_PAGE: u32 = 5;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewReport {
    #[validate(length(min = 1, max = 100, message = "Title is required."))]
    pub title: String,
    #[validate(length(min = 1, max = 2000, message = "Description is required."))]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CommentForm {
    #[validate(length(min = 1, max = 2000, message = "Comment cannot be empty."))]
    pub message: String,
}

/// One page of reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPage {
    pub items: Vec<ReportThread>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u64,
}

/// Comment with its author's username.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetail {
    #[serde(flatten)]
    pub report: ReportThread,
    pub comments: Vec<CommentView>,
}

fn page_of(page: crate::database::Page<ReportThread>, number: u32) -> ReportPage {
    ReportPage {
        items: page.items,
        page: number,
        per_page: PER_PAGE,
        total: page.total,
        total_pages: page.total.div_ceil(u64::from(PER_PAGE)),
    }
}

async fn accessible(state: &AppState, actor: &Account, id: Uuid) -> Result<ReportThread> {
    let report = state
        .db
        .find_report(id)
        .await?
        .ok_or(ServerError::NotFound("report"))?;
    if !report.can_access(actor) {
        return Err(ServerError::Forbidden("only the author and HR can access this report"));
    }

    Ok(report)
}

/// File a report against the employee's house.
pub async fn create(state: &AppState, account: &Account, form: NewReport) -> Result<ReportThread> {
    let house_id = state
        .db
        .find_profile_by_user(account.id)
        .await?
        .and_then(|p| p.house_id)
        .ok_or(ServerError::Forbidden("you are not assigned to a house"))?;

    let now = state.clock.now();
    let report = ReportThread {
        id: Uuid::new_v4(),
        house_id,
        title: form.title.trim().to_owned(),
        description: form.description.trim().to_owned(),
        status: ReportStatus::Open,
        created_by: account.id,
        created_at: now,
        updated_at: now,
    };
    state.db.insert_report(&report).await?;

    tracing::info!(report_id = %report.id, %house_id, user_id = %account.id, "facility report filed");
    metrics::counter!("facility_reports_total").increment(1);

    Ok(report)
}

/// The employee's own reports, newest first.
pub async fn list_mine(state: &AppState, account: &Account, page: u32) -> Result<ReportPage> {
    let page = page.max(1);
    let Some(house_id) = state
        .db
        .find_profile_by_user(account.id)
        .await?
        .and_then(|p| p.house_id)
    else {
        return Ok(page_of(crate::database::Page { items: Vec::new(), total: 0 }, page));
    };

    let reports = state
        .db
        .list_reports(house_id, Some(account.id), page, PER_PAGE)
        .await?;
    Ok(page_of(reports, page))
}

/// Every report of a house, for HR.
pub async fn list_for_house(state: &AppState, house_id: Uuid, page: u32) -> Result<ReportPage> {
    let page = page.max(1);
    state
        .db
        .find_house(house_id)
        .await?
        .ok_or(ServerError::NotFound("house"))?;

    let reports = state.db.list_reports(house_id, None, page, PER_PAGE).await?;
    Ok(page_of(reports, page))
}

pub async fn comments(state: &AppState, actor: &Account, id: Uuid) -> Result<Vec<CommentView>> {
    accessible(state, actor, id).await?;

    let comments = state.db.list_comments(id).await?;
    let mut authors: Vec<Uuid> = comments.iter().map(|c| c.created_by).collect();
    authors.sort_unstable();
    authors.dedup();
    let accounts = state.db.find_accounts(&authors).await?;

    Ok(comments
        .into_iter()
        .map(|comment| CommentView {
            author: accounts
                .iter()
                .find(|a| a.id == comment.created_by)
                .map(|a| a.username.clone()),
            comment,
        })
        .collect())
}

pub async fn get(state: &AppState, actor: &Account, id: Uuid) -> Result<ReportDetail> {
    let report = accessible(state, actor, id).await?;
    let comments = comments(state, actor, id).await?;

    Ok(ReportDetail { report, comments })
}

pub async fn update_status(state: &AppState, actor: &Account, id: Uuid, status: &str) -> Result<ReportThread> {
    let status: ReportStatus = status
        .parse()
        .map_err(|_| ServerError::field("status", "status", "Status must be Open, In Review or Closed."))?;
    accessible(state, actor, id).await?;

    let report = state
        .db
        .update_report_status(id, status, state.clock.now())
        .await?
        .ok_or(ServerError::NotFound("report"))?;

    tracing::info!(report_id = %id, %status, actor = %actor.id, "report status changed");

    Ok(report)
}

pub async fn add_comment(state: &AppState, actor: &Account, id: Uuid, form: CommentForm) -> Result<Comment> {
    accessible(state, actor, id).await?;

    let now = state.clock.now();
    let comment = Comment {
        id: Uuid::new_v4(),
        report_id: id,
        message: form.message.trim().to_owned(),
        created_by: actor.id,
        created_at: now,
        updated_at: now,
    };
    state.db.insert_comment(&comment).await?;

    Ok(comment)
}

/// Only the author of a comment may edit it.
pub async fn update_comment(
    state: &AppState,
    actor: &Account,
    report_id: Uuid,
    comment_id: Uuid,
    form: CommentForm,
) -> Result<Comment> {
    accessible(state, actor, report_id).await?;

    let comment = state
        .db
        .find_comment(comment_id)
        .await?
        .filter(|c| c.report_id == report_id)
        .ok_or(ServerError::NotFound("comment"))?;
    if comment.created_by != actor.id {
        return Err(ServerError::Forbidden("only the author can edit a comment"));
    }

    state
        .db
        .update_comment(comment_id, form.message.trim(), state.clock.now())
        .await?
        .ok_or(ServerError::NotFound("comment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::harness;
    use crate::workflow::housing;

    fn report(title: &str) -> NewReport {
        NewReport {
            title: title.into(),
            description: "The kitchen sink is leaking.".into(),
        }
    }

    fn comment(message: &str) -> CommentForm {
        CommentForm {
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn test_reports_require_a_house() {
        let harness = harness();
        let alice = harness.employee("alice").await;

        assert!(matches!(
            create(&harness.state, &alice, report("Leak")).await,
            Err(ServerError::Forbidden(_))
        ));
        assert_eq!(list_mine(&harness.state, &alice, 1).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_threads_are_private_to_author_and_hr() {
        let harness = harness();
        let hr = harness.hr().await;
        let house = harness.house().await;
        let alice = harness.employee("alice").await;
        let bob = harness.employee("bob").await;
        housing::assign(&harness.state, alice.id).await.unwrap();
        housing::assign(&harness.state, bob.id).await.unwrap();

        let thread = create(&harness.state, &alice, report("Leak")).await.unwrap();
        assert_eq!(thread.house_id, house.id);
        assert_eq!(thread.status, ReportStatus::Open);

        assert!(matches!(
            get(&harness.state, &bob, thread.id).await,
            Err(ServerError::Forbidden(_))
        ));
        assert!(matches!(
            add_comment(&harness.state, &bob, thread.id, comment("me too")).await,
            Err(ServerError::Forbidden(_))
        ));

        let reply = add_comment(&harness.state, &hr, thread.id, comment("Plumber on Monday."))
            .await
            .unwrap();
        update_status(&harness.state, &hr, thread.id, "In Review").await.unwrap();

        let detail = get(&harness.state, &alice, thread.id).await.unwrap();
        assert_eq!(detail.report.status, ReportStatus::InReview);
        assert_eq!(detail.comments.len(), 1);
        assert_eq!(detail.comments[0].author.as_deref(), Some("hr"));

        // Authorship is per comment, not per thread.
        assert!(matches!(
            update_comment(&harness.state, &alice, thread.id, reply.id, comment("edited")).await,
            Err(ServerError::Forbidden(_))
        ));
        let edited = update_comment(&harness.state, &hr, thread.id, reply.id, comment("Plumber on Tuesday."))
            .await
            .unwrap();
        assert_eq!(edited.message, "Plumber on Tuesday.");

        assert!(matches!(
            update_status(&harness.state, &hr, thread.id, "done").await,
            Err(ServerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_is_paged() {
        let harness = harness();
        let house = harness.house().await;
        let alice = harness.employee("alice").await;
        let bob = harness.employee("bob").await;
        housing::assign(&harness.state, alice.id).await.unwrap();
        housing::assign(&harness.state, bob.id).await.unwrap();

        for i in 0..7 {
            create(&harness.state, &alice, report(&format!("Issue {i}"))).await.unwrap();
            harness.clock.advance(chrono::Duration::minutes(1));
        }
        create(&harness.state, &bob, report("Noise")).await.unwrap();

        let first = list_mine(&harness.state, &alice, 1).await.unwrap();
        assert_eq!((first.items.len(), first.total, first.total_pages), (5, 7, 2));
        assert_eq!(first.items[0].title, "Issue 6");
        let second = list_mine(&harness.state, &alice, 2).await.unwrap();
        assert_eq!(second.items.len(), 2);

        let all = list_for_house(&harness.state, house.id, 1).await.unwrap();
        assert_eq!(all.total, 8);
        assert!(matches!(
            list_for_house(&harness.state, Uuid::new_v4(), 1).await,
            Err(ServerError::NotFound("house"))
        ));
    }
}
