//! Publishing an assembled run to the site's CMS.
//!
//! A run gets at most one article record. Publishing again reuses that
//! record and only repeats the push to the CMS.

use chrono::Utc;
use contentforge_clients::{DraftPost, RemotePost};
use contentforge_shared::{
    ArticleId, ContentForgeError, GeneratedArticle, PipelineRun, Result, SeoMetadata,
};
use tracing::{info, instrument};

use crate::context::PipelineContext;
use crate::markup::word_count;

/// What a publish did.
#[derive(Debug, Clone)]
pub struct Publication {
    pub article: GeneratedArticle,
    pub remote: RemotePost,
    /// Whether the article record already existed.
    pub reused_article: bool,
}

/// Push a run's assembled article as a draft post.
///
/// Credentials are resolved before anything is written, so a site without
/// them fails without leaving an article behind.
#[instrument(skip_all, fields(run_id = %run.id, site = %run.site_id))]
pub async fn publish_run(ctx: &PipelineContext, run: &PipelineRun) -> Result<Publication> {
    let (Some(html), Some(seo)) = (&run.assembled_html, &run.seo) else {
        return Err(ContentForgeError::validation(format!(
            "run {} has not been assembled",
            run.id
        )));
    };

    let site = ctx.config.site(&run.site_id)?;
    let client = ctx.services.cms.connect(site)?;

    let (article, reused_article) = match run.article_id {
        Some(id) => (ctx.stores.runs.get_article(id).await?, true),
        None => match ctx.stores.runs.article_for_run(run.id).await? {
            // Created by an attempt that stopped before attaching it.
            Some(article) => {
                ctx.stores.runs.attach_article(run.id, article.id).await?;
                (article, true)
            }
            None => (create_article(ctx, run, html, seo).await?, false),
        },
    };

    let mut post = DraftPost::new(&article.title, &article.html);
    if !article.seo.seo_description.is_empty() {
        post.excerpt = Some(article.seo.seo_description.clone());
    }
    let remote = client.create_draft_post(&post).await?;
    ctx.stores
        .runs
        .record_publication(run.id, &remote.remote_id, &remote.url)
        .await?;

    info!(
        article_id = %article.id,
        remote_id = %remote.remote_id,
        url = %remote.url,
        reused_article,
        "article published"
    );
    Ok(Publication {
        article,
        remote,
        reused_article,
    })
}

async fn create_article(
    ctx: &PipelineContext,
    run: &PipelineRun,
    html: &str,
    seo: &SeoMetadata,
) -> Result<GeneratedArticle> {
    let article = GeneratedArticle {
        id: ArticleId::new(),
        run_id: run.id,
        site_id: run.site_id.clone(),
        title: seo.title.clone(),
        html: html.to_owned(),
        seo: seo.clone(),
        word_count: word_count(html),
        created_at: Utc::now(),
    };
    ctx.stores.runs.create_article(&article).await?;
    ctx.stores.runs.attach_article(run.id, article.id).await?;
    Ok(article)
}
