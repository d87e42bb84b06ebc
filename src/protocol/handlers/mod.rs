//! Built-in command handlers

pub mod auth;
pub mod session;
pub mod transfer;

use crate::protocol::dispatch::CommandRegistry;

pub(crate) fn register_all(registry: &mut CommandRegistry) {
    registry.register("USER", auth::User);
    registry.register("PASS", auth::Pass);
    registry.register("REIN", auth::Rein);
    registry.register("QUIT", auth::Quit);

    registry.register("NOOP", session::Noop);
    registry.register("SYST", session::Syst);
    registry.register("TYPE", session::Type);
    registry.register("PWD", session::Pwd);
    registry.register("XPWD", session::Pwd);
    registry.register("CWD", session::Cwd);
    registry.register("XCWD", session::Cwd);
    registry.register("CDUP", session::Cdup);
    registry.register("REST", session::Rest);
    registry.register("ABOR", session::Abor);
    registry.register("STAT", session::Stat);

    registry.register("PASV", transfer::Pasv);
    registry.register("PORT", transfer::Port);
    registry.register("LIST", transfer::List);
    registry.register("NLST", transfer::Nlst);
    registry.register("RETR", transfer::Retr);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::auth::{ANONYMOUS, InMemoryUserDirectory, UserRecord};
    use crate::client::connection::{ConnectionHandle, ReplySender};
    use crate::client::state::SharedSession;
    use crate::config::ServerConfig;
    use crate::error::CommandError;
    use crate::protocol::dispatch::{CommandContext, CommandFlow, CommandRegistry};
    use crate::protocol::parser::parse_request;
    use crate::protocol::responses::Reply;
    use crate::server::service::ConnectionService;

    struct Harness {
        _root: tempfile::TempDir,
        config: ServerConfig,
        service: Arc<ConnectionService>,
        commands: CommandRegistry,
        session: SharedSession,
        connection: ConnectionHandle,
        replies: ReplySender,
        rx: UnboundedReceiver<Reply>,
    }

    impl Harness {
        async fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            std::fs::create_dir(root.path().join("docs")).unwrap();
            std::fs::write(root.path().join("docs/readme.txt"), b"hello world").unwrap();

            let mut config = ServerConfig::default();
            config.connections.default_root = root.path().display().to_string();
            config.connections.create_default_users = false;
            config.connections.scheduler_interval_secs = 0;
            config.transfer.passive_port_min = 0;
            config.transfer.passive_port_max = 1;

            let directory = Arc::new(InMemoryUserDirectory::with_users([
                UserRecord::new("alice", "secret", root.path()),
                UserRecord::new(ANONYMOUS, "", root.path()),
            ]));
            let service = ConnectionService::start(config.connections.clone(), directory)
                .await
                .unwrap();

            let (connection, _signal) = ConnectionHandle::new("127.0.0.1:45000".parse().unwrap());
            let session = service.new_connection(connection.clone()).await;
            let (replies, rx) = ReplySender::channel();

            Self {
                _root: root,
                config,
                service,
                commands: CommandRegistry::with_defaults(),
                session,
                connection,
                replies,
                rx,
            }
        }

        async fn send(&mut self, line: &str) -> Result<CommandFlow, CommandError> {
            let mut session = self.session.lock().await;
            let mut ctx = CommandContext {
                service: &self.service,
                config: &self.config,
                session: &mut *session,
                connection: &self.connection,
                replies: &self.replies,
            };
            self.commands.dispatch(&mut ctx, &parse_request(line)).await
        }

        async fn codes(&mut self, line: &str) -> Vec<u16> {
            self.send(line).await.unwrap();
            let mut codes = Vec::new();
            while let Ok(reply) = self.rx.try_recv() {
                codes.push(reply.code());
            }
            codes
        }

        async fn next_reply(&mut self) -> Reply {
            tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .unwrap()
                .unwrap()
        }

        async fn login(&mut self) {
            assert_eq!(self.codes("USER alice").await, vec![331]);
            assert_eq!(self.codes("PASS secret").await, vec![230]);
        }
    }

    #[tokio::test]
    async fn unknown_and_empty_verbs() {
        let mut h = Harness::new().await;
        assert_eq!(h.codes("FROB x").await, vec![502]);
        assert_eq!(h.codes("").await, vec![500]);
    }

    #[tokio::test]
    async fn login_required_before_file_commands() {
        let mut h = Harness::new().await;
        assert_eq!(h.codes("PWD").await, vec![530]);
        assert_eq!(h.codes("ABOR").await, vec![530]);
        assert_eq!(h.codes("NOOP").await, vec![200]);
    }

    #[tokio::test]
    async fn missing_arguments_answer_501() {
        let mut h = Harness::new().await;
        assert_eq!(h.codes("USER").await, vec![501]);
        h.login().await;
        assert_eq!(h.codes("CWD").await, vec![501]);
        assert_eq!(h.codes("RETR").await, vec![501]);
        assert_eq!(h.codes("REST abc").await, vec![501]);
    }

    #[tokio::test]
    async fn wrong_password_then_retry() {
        let mut h = Harness::new().await;
        assert_eq!(h.codes("PASS secret").await, vec![503]);
        assert_eq!(h.codes("USER alice").await, vec![331]);
        assert_eq!(h.codes("PASS nope").await, vec![530]);
        assert!(!h.session.lock().await.is_logged_in());
        h.login().await;
    }

    #[tokio::test]
    async fn anonymous_login_accepts_empty_password() {
        let mut h = Harness::new().await;
        assert_eq!(h.codes("USER anonymous").await, vec![331]);
        assert_eq!(h.codes("PASS").await, vec![230]);
        assert_eq!(h.service.statistics().await.current_anonymous_logins, 1);
    }

    #[tokio::test]
    async fn navigation_stays_inside_root() {
        let mut h = Harness::new().await;
        h.login().await;

        assert_eq!(h.codes("CWD docs").await, vec![250]);
        assert_eq!(h.session.lock().await.current_dir(), "/docs");
        assert_eq!(h.codes("CWD missing").await, vec![550]);
        assert_eq!(h.codes("CDUP").await, vec![250]);
        assert_eq!(h.codes("CDUP").await, vec![250]);
        assert_eq!(h.session.lock().await.current_dir(), "/");
        assert_eq!(h.codes("PWD").await, vec![257]);
    }

    #[tokio::test]
    async fn abor_without_transfer_replies_226() {
        let mut h = Harness::new().await;
        h.login().await;
        assert_eq!(h.codes("REST 10").await, vec![350]);

        assert_eq!(h.codes("ABOR").await, vec![226]);
        assert_eq!(h.session.lock().await.take_restart_offset(), 0);
        assert!(h.session.lock().await.is_logged_in());
    }

    #[tokio::test]
    async fn abor_interrupts_pending_transfer() {
        let mut h = Harness::new().await;
        h.login().await;

        assert_eq!(h.codes("PASV").await, vec![227]);
        // Nobody connects to the passive port, so the transfer stays pending.
        assert_eq!(h.codes("RETR docs/readme.txt").await, vec![150]);
        assert!(h.session.lock().await.data_channel().is_transfer_in_flight());

        assert_eq!(h.codes("ABOR").await, vec![426, 226]);
        assert!(!h.session.lock().await.data_channel().is_transfer_in_flight());
        assert!(h.session.lock().await.is_logged_in());
        assert!(!h.connection.is_closed());
    }

    #[tokio::test]
    async fn retr_without_data_channel_is_refused() {
        let mut h = Harness::new().await;
        h.login().await;
        assert_eq!(h.codes("RETR docs/readme.txt").await, vec![425]);
        assert_eq!(h.codes("RETR nothing.txt").await, vec![550]);
    }

    #[tokio::test]
    async fn retr_and_list_check_the_kind_of_path() {
        let mut h = Harness::new().await;
        h.login().await;
        assert_eq!(h.codes("PASV").await, vec![227]);

        assert_eq!(h.codes("RETR docs").await, vec![550]);
        assert_eq!(h.codes("LIST docs/readme.txt").await, vec![550]);
        assert_eq!(h.codes("NLST docs").await, vec![150]);
    }

    #[tokio::test]
    async fn passive_retr_delivers_file_then_226() {
        let mut h = Harness::new().await;
        h.login().await;

        h.send("PASV").await.unwrap();
        let pasv = h.next_reply().await;
        assert_eq!(pasv.code(), 227);
        let port = passive_port(pasv.text());

        assert_eq!(h.codes("REST 6").await, vec![350]);
        h.send("RETR docs/readme.txt").await.unwrap();
        assert_eq!(h.next_reply().await.code(), 150);

        let mut data = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut received = String::new();
        data.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "world");
        assert_eq!(h.next_reply().await.code(), 226);
    }

    #[tokio::test]
    async fn port_from_foreign_host_is_rejected() {
        let mut h = Harness::new().await;
        h.login().await;
        assert_eq!(h.codes("PORT 10,0,0,9,4,1").await, vec![501]);
        assert_eq!(h.codes("PORT 127,0,0,1,4,1").await, vec![200]);
    }

    #[tokio::test]
    async fn rein_logs_out_but_keeps_connection() {
        let mut h = Harness::new().await;
        h.login().await;
        assert_eq!(h.codes("REIN").await, vec![220]);
        assert!(!h.session.lock().await.is_logged_in());
        assert_eq!(h.service.statistics().await.current_logins, 0);
        assert_eq!(h.codes("PWD").await, vec![530]);
    }

    #[tokio::test]
    async fn quit_closes_connection() {
        let mut h = Harness::new().await;
        assert_eq!(h.send("QUIT").await.unwrap(), CommandFlow::Close);
        assert_eq!(h.next_reply().await.code(), 221);
    }

    #[tokio::test]
    async fn type_accepts_ascii_and_image() {
        let mut h = Harness::new().await;
        h.login().await;
        assert_eq!(h.codes("TYPE I").await, vec![200]);
        assert_eq!(h.codes("TYPE a").await, vec![200]);
        assert_eq!(h.codes("TYPE E").await, vec![504]);
    }

    fn passive_port(text: &str) -> u16 {
        let start = text.find('(').unwrap() + 1;
        let end = text.find(')').unwrap();
        let fields: Vec<u16> = text[start..end]
            .split(',')
            .map(|f| f.parse().unwrap())
            .collect();
        fields[4] * 256 + fields[5]
    }
}
