pub mod agent_socket;
