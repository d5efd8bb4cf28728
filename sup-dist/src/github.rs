use crate::tag::Tag;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{
    header::{HeaderValue, ACCEPT, AUTHORIZATION},
    Client, RequestBuilder,
};
use std::{env, sync::LazyLock};
use url::Url;

pub(crate) static DEFAULT_API_BASE_URL: LazyLock<Url> =
    LazyLock::new(|| Url::parse("https://api.github.com").unwrap());

pub(crate) const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Anything that can produce a tag listing, newest first.
#[async_trait]
pub trait TagSource {
    async fn tags(&self) -> Result<Vec<Tag>>;
}

#[derive(Debug)]
pub(crate) struct GitHub {
    owner: String,
    repo: String,
    api_base_url: Url,
    token: Option<String>,
}

impl GitHub {
    pub(crate) fn new(
        project_name: &str,
        api_base: Option<&str>,
        mut token: Option<String>,
    ) -> Result<Self> {
        let (owner, repo) = split_project_name(project_name)?;

        let api_base_url = if let Some(api_base) = api_base {
            Url::parse(api_base)
                .with_context(|| format!("could not parse `{api_base}` as a URL"))?
        } else {
            DEFAULT_API_BASE_URL.clone()
        };

        if token.is_none() {
            token = env::var(TOKEN_ENV_VAR).ok();
            if token.is_some() {
                debug!("Using GitHub token from the {TOKEN_ENV_VAR} environment variable.");
            }
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            api_base_url,
            token,
        })
    }

    pub(crate) fn tags_url(&self) -> Url {
        let mut url = self.api_base_url.clone();
        url.path_segments_mut()
            .expect("could not get path segments for url")
            .pop_if_empty()
            .push("repos")
            .push(&self.owner)
            .push(&self.repo)
            .push("tags");
        url
    }

    pub(crate) async fn fetch_tags(&self, client: &Client) -> Result<Vec<Tag>> {
        let url = self.tags_url();
        debug!("Getting tags from `{url}`");

        let mut req_builder = client
            .get(url.clone())
            .header(ACCEPT, HeaderValue::from_str("application/json")?);
        req_builder = self.maybe_add_token_header(req_builder)?;
        let resp = client
            .execute(req_builder.build()?)
            .await
            .with_context(|| format!("failed to execute HTTP request to {url}"))?;

        if let Err(e) = resp.error_for_status_ref() {
            return Err(anyhow::Error::new(e));
        }

        let tags = resp
            .json::<Vec<Tag>>()
            .await
            .with_context(|| format!("the response from {url} was not a list of tags"))?;
        debug!("Got {} tag(s) for {}/{}", tags.len(), self.owner, self.repo);

        Ok(tags)
    }

    fn maybe_add_token_header(&self, mut req_builder: RequestBuilder) -> Result<RequestBuilder> {
        if let Some(token) = self.token.as_deref() {
            debug!("Adding GitHub token to GitHub request.");
            let bearer = format!("Bearer {token}");
            let mut auth_val = HeaderValue::from_str(&bearer)?;
            auth_val.set_sensitive(true);
            req_builder = req_builder.header(AUTHORIZATION, auth_val);
        } else {
            debug!("No token given.");
        }
        Ok(req_builder)
    }
}

/// A [`GitHub`] paired with the client used to talk to it.
#[derive(Debug)]
pub(crate) struct GitHubTags {
    pub(crate) github: GitHub,
    pub(crate) client: Client,
}

#[async_trait]
impl TagSource for GitHubTags {
    async fn tags(&self) -> Result<Vec<Tag>> {
        self.github.fetch_tags(&self.client).await
    }
}

pub(crate) fn split_project_name(project_name: &str) -> Result<(&str, &str)> {
    let mut parts = project_name.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
            Ok((owner, repo))
        }
        _ => Err(anyhow!(
            "could not parse owner and repo name from `{project_name}`, expected something like `pressly/sup`"
        )),
    }
}
