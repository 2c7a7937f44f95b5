//! nginx virtual host generation and TLS acquisition.
//!
//! Regenerates `<app>.conf` from scratch on every deploy: upstream
//! selection (unix socket vs TCP), TLS material (ACME or self-signed
//! fallback), static/cache mappings, ACLs, and an HTTPS-only redirect.
//! The conf is written via write-then-rename and validated with
//! `nginx -t`; a failing validation unlinks the just-written file so a
//! broken deploy never poisons other sites.

use std::fs;
use std::net::TcpListener;
use std::path::Path;

use anyhow::{Context, Result, bail};
use piku_config::EnvFile;
use piku_retry::{RetryExecutor, RetryPolicy};
use piku_types::Paths;
use serde::Deserialize;

/// Which frontend-capable kinds are present in an app's Procfile.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresentKinds {
    pub wsgi: bool,
    pub jwsgi: bool,
    pub rwsgi: bool,
    pub web: bool,
    pub static_: bool,
    pub php: bool,
}

impl PresentKinds {
    pub fn any_frontend(&self) -> bool {
        self.wsgi || self.jwsgi || self.rwsgi || self.web || self.static_ || self.php
    }

    /// Whether the upstream should be a unix socket (WSGI-style/PHP) or a
    /// bind-address:port pair (plain `web`).
    pub fn upstream_is_socket(&self) -> bool {
        self.wsgi || self.jwsgi || self.rwsgi || self.php
    }

    /// Whether every present frontend kind is `static` or WSGI-style,
    /// which permits rewriting `uwsgi_*` directives to `proxy_*`.
    pub fn only_static_or_wsgi(&self) -> bool {
        !self.web && (self.static_ || self.wsgi || self.jwsgi || self.rwsgi)
    }
}

/// Whether nginx configuration should be generated at all for this app:
/// `NGINX_SERVER_NAME` is set and at least one frontend-capable kind is
/// present.
pub fn should_configure(env: &EnvFile, kinds: &PresentKinds) -> bool {
    env.get("NGINX_SERVER_NAME").is_some_and(|v| !v.trim().is_empty()) && kinds.any_frontend()
}

/// Assign the worker's listen port: from `PORT` if set, otherwise an
/// ephemeral free TCP port picked by binding to `:0`.
pub fn assign_port(env: &EnvFile) -> Result<u16> {
    if let Some(raw) = env.get("PORT") {
        return raw.parse::<u16>().with_context(|| format!("invalid PORT value: {raw:?}"));
    }
    pick_free_port()
}

fn pick_free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("binding ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Resolved listen addresses for the `listen` directives.
#[derive(Debug, Clone)]
pub struct ListenAddresses {
    pub ipv4: String,
    pub ipv6: Option<String>,
    pub bind_address: String,
}

pub fn listen_addresses(env: &EnvFile) -> ListenAddresses {
    let disable_ipv6 = piku_types::is_truthy(env.get("DISABLE_IPV6"));
    ListenAddresses {
        ipv4: env.get("NGINX_IPV4_ADDRESS").unwrap_or("0.0.0.0").to_string(),
        ipv6: if disable_ipv6 { None } else { Some(env.get("NGINX_IPV6_ADDRESS").unwrap_or("[::]").to_string()) },
        bind_address: env.get("BIND_ADDRESS").unwrap_or("127.0.0.1").to_string(),
    }
}

/// Optional SSL listen directive suffixes detected from `nginx -V`.
#[derive(Debug, Clone, Default)]
pub struct NginxFeatures {
    pub http2: bool,
    pub spdy: bool,
}

/// Probe `nginx -V`'s stderr banner for `http_v2_module`/`http_spdy_module`.
/// Returns defaults (both false) if `nginx` is not on `PATH`.
pub fn detect_features() -> NginxFeatures {
    if !piku_process::command_exists("nginx") {
        return NginxFeatures::default();
    }
    let Ok(result) = piku_process::run_command("nginx", &["-V"]) else {
        return NginxFeatures::default();
    };
    let banner = format!("{}{}", result.stdout, result.stderr);
    NginxFeatures {
        http2: banner.contains("http_v2_module"),
        spdy: banner.contains("http_spdy_module"),
    }
}

fn ssl_listen_suffix(features: &NginxFeatures) -> &'static str {
    if features.http2 {
        " http2"
    } else if features.spdy {
        " spdy"
    } else {
        ""
    }
}

/// Render the upstream target: a unix socket for WSGI-style/PHP kinds,
/// or `bind_address:port` for plain `web`.
pub fn upstream(app: &str, nginx_root: &Path, kinds: &PresentKinds, bind_address: &str, port: u16) -> String {
    if kinds.upstream_is_socket() {
        format!("unix:{}", nginx_root.join(format!("{app}.sock")).display())
    } else {
        format!("{bind_address}:{port}")
    }
}

/// Parse `NGINX_STATIC_PATHS` (`/<url>:<path>[,…]`) into `location`
/// blocks. If a `static` worker is present, an implicit `/:<command>/`
/// entry is prepended.
pub fn render_static_mappings(env: &EnvFile, static_command: Option<&str>, app_dir: &Path) -> Vec<String> {
    let catch_all = env.get("NGINX_CATCH_ALL").unwrap_or("/maintenance.html");
    let mut mappings: Vec<(String, String)> = Vec::new();

    if let Some(command) = static_command {
        mappings.push(("/".to_string(), command.trim_matches('/').to_string()));
    }

    if let Some(raw) = env.get("NGINX_STATIC_PATHS") {
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some((url, path)) = entry.split_once(':') {
                mappings.push((url.to_string(), path.to_string()));
            }
        }
    }

    mappings
        .into_iter()
        .map(|(url, path)| {
            let alias = app_dir.join(&path).display().to_string();
            format!(
                "location {url} {{\n    alias {alias}/;\n    sendfile on;\n    directio 8m;\n    aio threads;\n    try_files $uri $uri.html $uri/ {catch_all} =404;\n}}"
            )
        })
        .collect()
}

/// Render the `uwsgi_cache_path` directive and matching `location` block
/// when `NGINX_CACHE_PREFIXES` is set.
pub fn render_cache(env: &EnvFile, app: &str) -> Option<(String, String)> {
    let prefixes = env.get("NGINX_CACHE_PREFIXES")?;
    if prefixes.trim().is_empty() {
        return None;
    }

    let size = env.get("NGINX_CACHE_SIZE").unwrap_or("1");
    let expiry = env.get("NGINX_CACHE_EXPIRY").unwrap_or("86400");
    let cache_time = env.get("NGINX_CACHE_TIME").unwrap_or("60s");
    let redirects = if piku_types::is_truthy(env.get("NGINX_CACHE_REDIRECTS")) { "on" } else { "off" };
    let any = if piku_types::is_truthy(env.get("NGINX_CACHE_ANY")) { "on" } else { "off" };
    let control = if piku_types::is_truthy(env.get("NGINX_CACHE_CONTROL")) { "on" } else { "off" };

    let cache_path = format!(
        "uwsgi_cache_path /tmp/nginx-cache-{app} levels=1:2 keys_zone={app}:{size}m inactive={expiry}s;"
    );

    let alternation = prefixes
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("|");

    let location = format!(
        "location ~* ^/({alternation}) {{\n    uwsgi_cache {app};\n    uwsgi_cache_valid 200 {cache_time};\n    uwsgi_cache_use_stale error timeout updating;\n    uwsgi_ignore_headers Cache-Control Expires Set-Cookie;\n    uwsgi_cache_bypass $cookie_nocache;\n    # redirects={redirects} any={any} control={control}\n}}"
    );

    Some((cache_path, location))
}

#[derive(Deserialize)]
struct CloudflareIpsResponse {
    result: CloudflareIpsResult,
}

#[derive(Deserialize)]
struct CloudflareIpsResult {
    ipv4_cidrs: Vec<String>,
    #[serde(default)]
    ipv6_cidrs: Vec<String>,
}

/// Fetch Cloudflare's published edge IP ranges. A fetch failure is
/// reported to the caller, which should log a warning and proceed with
/// an empty ACL rather than failing the deploy.
pub fn fetch_cloudflare_ips(include_ipv6: bool) -> Result<Vec<String>> {
    let response: CloudflareIpsResponse = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .context("building http client")?
        .get("https://api.cloudflare.com/client/v4/ips")
        .send()
        .context("fetching cloudflare ip ranges")?
        .error_for_status()
        .context("cloudflare ips endpoint returned an error status")?
        .json()
        .context("parsing cloudflare ips response")?;

    let mut cidrs = response.result.ipv4_cidrs;
    if include_ipv6 {
        cidrs.extend(response.result.ipv6_cidrs);
    }
    Ok(cidrs)
}

/// Render the ACL block: `allow <cidr>;` for every entry, plus the
/// remote SSH client IP if present, then `allow 127.0.0.1; deny all;`.
pub fn render_acl(cidrs: &[String], ssh_client_ip: Option<&str>) -> Vec<String> {
    let mut lines: Vec<String> = cidrs.iter().map(|cidr| format!("allow {cidr};")).collect();
    if let Some(ip) = ssh_client_ip {
        lines.push(format!("allow {ip};"));
    }
    lines.push("allow 127.0.0.1;".to_string());
    lines.push("deny all;".to_string());
    lines
}

/// Outcome of [`ensure_tls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsStatus {
    Acme,
    SelfSigned,
    AlreadyPresent,
}

/// Ensure `<app>.key`/`<app>.crt` exist, preferring ACME issuance via
/// `acme.sh` (retried with the shared backoff policy), falling back to a
/// self-signed RSA-4096 1-year certificate via `openssl req -x509`.
pub fn ensure_tls(
    paths: &Paths,
    app: &str,
    domains: &[String],
    acme_root: &Path,
    acme_ca: &str,
    acme_www: &Path,
) -> Result<TlsStatus> {
    let key_path = paths.nginx_key(app);
    let crt_path = paths.nginx_crt(app);

    if key_path.is_file() && crt_path.is_file() {
        return Ok(TlsStatus::AlreadyPresent);
    }

    let acme_sh = acme_root.join("acme.sh");
    if acme_sh.is_file() && !domains.is_empty() {
        if try_acme_issue(&acme_sh, app, domains, acme_ca, acme_www, &key_path, &crt_path).is_ok() {
            mark_acme_issued(paths, app, domains)?;
            return Ok(TlsStatus::Acme);
        }
    }

    issue_self_signed(&key_path, &crt_path, domains.first().map(String::as_str).unwrap_or(app))?;
    Ok(TlsStatus::SelfSigned)
}

/// Symlink `ACME_WWW/<app>` to the app's nginx webroot (so the acme-challenge
/// `.well-known` path is reachable before the vhost exists) and drop a
/// per-domain issued marker so a later deploy can tell ACME already succeeded
/// for that domain without re-reading `acme.sh`'s own state directory.
fn mark_acme_issued(paths: &Paths, app: &str, domains: &[String]) -> Result<()> {
    let link = paths.acme_symlink(app);
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    if !link.exists() {
        #[cfg(unix)]
        std::os::unix::fs::symlink(paths.nginx_root(), &link).ok();
    }
    for domain in domains {
        let marker = paths.acme_issued_marker(app, domain);
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&marker, "")?;
    }
    Ok(())
}

fn try_acme_issue(
    acme_sh: &Path,
    app: &str,
    domains: &[String],
    acme_ca: &str,
    acme_www: &Path,
    key_path: &Path,
    crt_path: &Path,
) -> Result<()> {
    let mut issue_args: Vec<String> = vec!["--issue".to_string()];
    for domain in domains {
        issue_args.push("-d".to_string());
        issue_args.push(domain.clone());
    }
    issue_args.push("-w".to_string());
    issue_args.push(acme_www.display().to_string());
    issue_args.push("--server".to_string());
    issue_args.push(acme_ca.to_string());

    let executor = RetryExecutor::from_policy(RetryPolicy::Aggressive);
    let args_refs: Vec<&str> = issue_args.iter().map(String::as_str).collect();

    executor
        .run(|_attempt| piku_process::run_command(acme_sh.to_str().unwrap_or("acme.sh"), &args_refs).and_then(|r| r.ok().map(|_| ())))
        .map_err(|e| anyhow::anyhow!("acme.sh --issue failed for {app}: {e}"))?;

    let install_args = vec![
        "--install-cert".to_string(),
        "-d".to_string(),
        domains[0].clone(),
        "--key-file".to_string(),
        key_path.display().to_string(),
        "--fullchain-file".to_string(),
        crt_path.display().to_string(),
    ];
    let install_refs: Vec<&str> = install_args.iter().map(String::as_str).collect();
    piku_process::run_command(acme_sh.to_str().unwrap_or("acme.sh"), &install_refs)?.ok()?;

    Ok(())
}

fn issue_self_signed(key_path: &Path, crt_path: &Path, common_name: &str) -> Result<()> {
    if let Some(parent) = key_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let result = piku_process::run_command(
        "openssl",
        &[
            "req",
            "-x509",
            "-nodes",
            "-newkey",
            "rsa:4096",
            "-days",
            "365",
            "-keyout",
            key_path.to_str().unwrap_or("key.pem"),
            "-out",
            crt_path.to_str().unwrap_or("crt.pem"),
            "-subj",
            &format!("/CN={common_name}"),
        ],
    )?;
    result.ok()?;
    Ok(())
}

/// Everything needed to render a `<app>.conf`.
pub struct ConfContext<'a> {
    pub app: &'a str,
    pub env: &'a EnvFile,
    pub nginx_root: &'a Path,
    pub app_dir: &'a Path,
    pub kinds: PresentKinds,
    pub static_command: Option<&'a str>,
    pub port: u16,
    pub domains: &'a [String],
    pub acl_lines: Vec<String>,
    pub features: NginxFeatures,
    /// Cloudflare edge CIDRs to trust for `$remote_addr` rewriting via
    /// `real_ip_header CF-Connecting-IP`. Empty when `NGINX_CLOUDFLARE_ACL`
    /// is unset or the IP-range fetch failed.
    pub cloudflare_cidrs: Vec<String>,
}

/// Render the complete `<app>.conf` body.
pub fn render_conf(ctx: &ConfContext) -> String {
    let listen = listen_addresses(ctx.env);
    let upstream_target = upstream(ctx.app, ctx.nginx_root, &ctx.kinds, &listen.bind_address, ctx.port);
    let https_only = piku_types::is_truthy(ctx.env.get("NGINX_HTTPS_ONLY"));
    let allow_git = piku_types::is_truthy(ctx.env.get("NGINX_ALLOW_GIT_FOLDERS"));
    let server_names = ctx.env.get("NGINX_SERVER_NAME").unwrap_or_default().replace(',', " ");
    let ssl_suffix = ssl_listen_suffix(&ctx.features);

    let pass_directive = if ctx.kinds.only_static_or_wsgi() && !ctx.kinds.upstream_is_socket() {
        "proxy_pass"
    } else if ctx.kinds.upstream_is_socket() {
        "uwsgi_pass"
    } else {
        "proxy_pass"
    };

    let mut body = String::new();
    body.push_str(&format!("# generated for {}\n", ctx.app));

    if let Some((cache_path, _)) = render_cache(ctx.env, ctx.app) {
        body.push_str(&cache_path);
        body.push('\n');
    }

    for cidr in &ctx.cloudflare_cidrs {
        body.push_str(&format!("set_real_ip_from {cidr};\n"));
    }
    if !ctx.cloudflare_cidrs.is_empty() {
        body.push_str("real_ip_header CF-Connecting-IP;\n");
    }

    body.push_str("server {\n");
    body.push_str(&format!("    listen {}:80;\n", listen.ipv4));
    if let Some(ipv6) = &listen.ipv6 {
        body.push_str(&format!("    listen {ipv6}:80;\n"));
    }
    body.push_str(&format!("    server_name {server_names};\n"));

    if https_only {
        body.push_str("    location / {\n        return 301 https://$server_name$request_uri;\n    }\n");
    } else {
        body.push_str("    location / {\n");
        body.push_str(&format!("        {pass_directive} {upstream_target};\n"));
        for acl_line in &ctx.acl_lines {
            body.push_str(&format!("        {acl_line}\n"));
        }
        body.push_str("    }\n");
    }

    if !allow_git {
        body.push_str("    location ~ /\\.git { deny all; }\n");
    }

    for mapping in render_static_mappings(ctx.env, ctx.static_command, ctx.app_dir) {
        for line in mapping.lines() {
            body.push_str("    ");
            body.push_str(line);
            body.push('\n');
        }
    }

    if let Some((_, cache_location)) = render_cache(ctx.env, ctx.app) {
        for line in cache_location.lines() {
            body.push_str("    ");
            body.push_str(line);
            body.push('\n');
        }
    }

    if let Some(include_path) = ctx.env.get("NGINX_INCLUDE_FILE") {
        let resolved = ctx.app_dir.join(include_path);
        if let Ok(content) = fs::read_to_string(&resolved) {
            body.push_str(&content);
            body.push('\n');
        }
    }

    body.push_str("}\n");

    if https_only {
        body.push_str("server {\n");
        body.push_str(&format!("    listen {}:443 ssl{ssl_suffix};\n", listen.ipv4));
        if let Some(ipv6) = &listen.ipv6 {
            body.push_str(&format!("    listen {ipv6}:443 ssl{ssl_suffix};\n"));
        }
        body.push_str(&format!("    server_name {server_names};\n"));
        body.push_str(&format!("    ssl_certificate {}/{}.crt;\n", ctx.nginx_root.display(), ctx.app));
        body.push_str(&format!("    ssl_certificate_key {}/{}.key;\n", ctx.nginx_root.display(), ctx.app));
        body.push_str("    location / {\n");
        body.push_str(&format!("        {pass_directive} {upstream_target};\n"));
        body.push_str("    }\n");
        body.push_str("}\n");
    }

    body
}

/// Write `<app>.conf` via write-then-rename, then validate with
/// `nginx -t`. If `nginx` is not on `PATH`, validation is skipped (it is
/// an external collaborator this crate does not ship). A failing
/// validation unlinks the conf so the broken app never poisons
/// neighboring sites.
pub fn write_and_validate(paths: &Paths, app: &str, body: &str) -> Result<()> {
    let conf_path = paths.nginx_conf(app);
    piku_config::atomic_write(&conf_path, body)?;

    if !piku_process::command_exists("nginx") {
        return Ok(());
    }

    let result = piku_process::run_command("nginx", &["-t"])?;
    if !result.success {
        let _ = fs::remove_file(&conf_path);
        bail!("nginx -t failed for {app}, conf removed: {}", result.stderr);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn env_with(pairs: &[(&str, &str)]) -> EnvFile {
        let mut env = EnvFile::new();
        for (k, v) in pairs {
            env.set(*k, *v);
        }
        env
    }

    #[test]
    fn should_configure_requires_server_name_and_frontend() {
        let env = EnvFile::new();
        let kinds = PresentKinds { web: true, ..Default::default() };
        assert!(!should_configure(&env, &kinds));

        let env = env_with(&[("NGINX_SERVER_NAME", "demo.example.com")]);
        assert!(should_configure(&env, &kinds));
    }

    #[test]
    fn assign_port_uses_explicit_value() {
        let env = env_with(&[("PORT", "9001")]);
        assert_eq!(assign_port(&env).expect("port"), 9001);
    }

    #[test]
    fn assign_port_picks_free_port_when_unset() {
        let env = EnvFile::new();
        let port = assign_port(&env).expect("port");
        assert!(port > 0);
    }

    #[test]
    fn disable_ipv6_drops_ipv6_listen_address() {
        let env = env_with(&[("DISABLE_IPV6", "true")]);
        let listen = listen_addresses(&env);
        assert!(listen.ipv6.is_none());
    }

    #[test]
    fn upstream_uses_unix_socket_for_wsgi() {
        let kinds = PresentKinds { wsgi: true, ..Default::default() };
        let target = upstream("demo", Path::new("/nginx"), &kinds, "127.0.0.1", 8000);
        assert_eq!(target, "unix:/nginx/demo.sock");
    }

    #[test]
    fn upstream_uses_tcp_for_web() {
        let kinds = PresentKinds { web: true, ..Default::default() };
        let target = upstream("demo", Path::new("/nginx"), &kinds, "127.0.0.1", 8000);
        assert_eq!(target, "127.0.0.1:8000");
    }

    #[test]
    fn static_mapping_includes_implicit_entry_for_static_worker() {
        let env = EnvFile::new();
        let mappings = render_static_mappings(&env, Some("public"), Path::new("/apps/demo"));
        assert_eq!(mappings.len(), 1);
        assert!(mappings[0].contains("alias /apps/demo/public/"));
    }

    #[test]
    fn static_mapping_parses_explicit_paths_entries() {
        let env = env_with(&[("NGINX_STATIC_PATHS", "/assets:static/assets,/media:static/media")]);
        let mappings = render_static_mappings(&env, None, Path::new("/apps/demo"));
        assert_eq!(mappings.len(), 2);
        assert!(mappings[0].starts_with("location /assets"));
    }

    #[test]
    fn cache_mapping_absent_without_prefixes() {
        let env = EnvFile::new();
        assert!(render_cache(&env, "demo").is_none());
    }

    #[test]
    fn cache_mapping_present_with_prefixes() {
        let env = env_with(&[("NGINX_CACHE_PREFIXES", "api,static")]);
        let (path, location) = render_cache(&env, "demo").expect("cache");
        assert!(path.contains("keys_zone=demo:1m"));
        assert!(location.contains("^/(api|static)"));
    }

    #[test]
    fn acl_rendering_ends_with_localhost_then_deny() {
        let lines = render_acl(&["1.2.3.0/24".to_string()], Some("5.6.7.8"));
        assert_eq!(lines, vec!["allow 1.2.3.0/24;", "allow 5.6.7.8;", "allow 127.0.0.1;", "deny all;"]);
    }

    #[test]
    fn https_only_produces_exactly_one_redirect_directive() {
        let td = tempdir().expect("tempdir");
        let env = env_with(&[
            ("NGINX_SERVER_NAME", "demo.example.com"),
            ("NGINX_HTTPS_ONLY", "true"),
            ("PORT", "8000"),
        ]);
        let ctx = ConfContext {
            app: "demo",
            env: &env,
            nginx_root: td.path(),
            app_dir: td.path(),
            kinds: PresentKinds { web: true, ..Default::default() },
            static_command: None,
            port: 8000,
            domains: &["demo.example.com".to_string()],
            acl_lines: Vec::new(),
            features: NginxFeatures::default(),
            cloudflare_cidrs: Vec::new(),
        };
        let body = render_conf(&ctx);
        let redirect_count = body.matches("return 301 https://$server_name$request_uri;").count();
        assert_eq!(redirect_count, 1);
    }

    #[test]
    fn static_only_deploy_contains_alias_directive() {
        let td = tempdir().expect("tempdir");
        let env = env_with(&[("NGINX_SERVER_NAME", "demo.example.com")]);
        let ctx = ConfContext {
            app: "demo",
            env: &env,
            nginx_root: td.path(),
            app_dir: td.path(),
            kinds: PresentKinds { static_: true, ..Default::default() },
            static_command: Some("public"),
            port: 8000,
            domains: &[],
            acl_lines: Vec::new(),
            features: NginxFeatures::default(),
            cloudflare_cidrs: Vec::new(),
        };
        let body = render_conf(&ctx);
        assert!(body.contains(&format!("alias {}/public/", td.path().display())));
    }

    #[test]
    fn git_folder_denied_by_default() {
        let td = tempdir().expect("tempdir");
        let env = env_with(&[("NGINX_SERVER_NAME", "demo.example.com")]);
        let ctx = ConfContext {
            app: "demo",
            env: &env,
            nginx_root: td.path(),
            app_dir: td.path(),
            kinds: PresentKinds { web: true, ..Default::default() },
            static_command: None,
            port: 8000,
            domains: &[],
            acl_lines: Vec::new(),
            features: NginxFeatures::default(),
            cloudflare_cidrs: Vec::new(),
        };
        let body = render_conf(&ctx);
        assert!(body.contains("deny all;"));
        assert!(body.contains(".git"));
    }

    #[test]
    fn self_signed_fallback_creates_key_and_cert() {
        if !piku_process::command_exists("openssl") {
            return;
        }
        let td = tempdir().expect("tempdir");
        let paths = Paths::new(td.path().to_path_buf());
        let status = ensure_tls(&paths, "demo", &["demo.example.com".to_string()], Path::new("/nonexistent-acme-root"), "https://example.invalid", Path::new("/tmp"))
            .expect("ensure_tls");
        assert_eq!(status, TlsStatus::SelfSigned);
        assert!(paths.nginx_key("demo").is_file());
        assert!(paths.nginx_crt("demo").is_file());
    }
}
