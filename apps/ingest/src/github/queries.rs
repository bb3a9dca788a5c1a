// GraphQL documents used against the GitHub API.

/// One page of issues carrying any of `$labels`, oldest first.
pub const ISSUES_PAGE_QUERY: &str = r#"
query IssuesPage($owner: String!, $name: String!, $labels: [String!], $first: Int!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    issues(first: $first, after: $cursor, labels: $labels, orderBy: {field: CREATED_AT, direction: ASC}) {
      pageInfo {
        hasNextPage
        endCursor
      }
      nodes {
        id
        number
        title
        body
        url
        state
        createdAt
        updatedAt
        author {
          login
          avatarUrl
          url
        }
        labels(first: 20) {
          nodes {
            name
          }
        }
      }
    }
  }
}
"#;
